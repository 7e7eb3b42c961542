//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level when set, so a single module can
//! be turned up without touching the config file:
//!
//! ```text
//! RUST_LOG=sweep_daq::sensor=debug sweep_daq
//! ```

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;
use crate::error::{AppResult, SweepError};

/// Build the filter: `RUST_LOG` if present, otherwise the configured level.
pub fn env_filter(level: &str) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| SweepError::Configuration(format!("log level '{}': {}", level, e))),
    }
}

/// Install the global subscriber.
///
/// # Errors
/// Fails on an unparsable level or if a subscriber is already installed.
pub fn init(config: &ApplicationConfig) -> AppResult<()> {
    let filter = env_filter(&config.log_level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.log_format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| SweepError::Configuration(format!("tracing init failed: {}", e)))
}
