//! Custom error types for the application.
//!
//! `SweepError` is the single error type of the crate. Using `thiserror`, it
//! gathers the failure modes of an acquisition run:
//!
//! - **`Config`** / **`Configuration`**: loading errors from `figment` and
//!   semantic errors caught by `Settings::validate`.
//! - **`Io`** / **`Csv`**: output file problems.
//! - **`DeviceList`** / **`NoDeviceFound`**: actuator detection failures.
//! - **`Actuator`** / **`Timeout`**: failures raised by the motion-control
//!   layer. These are never caught locally and end the run.
//! - **`Sensor`**: an error code reported by the sensor SDK, together with the
//!   call site and the SDK's own error text.
//! - **`FeatureNotEnabled`**: a hardware backend was requested but the crate
//!   was built without the matching feature.
//!
//! By using `#[from]`, `SweepError` can be created from the underlying error
//! types with the `?` operator.

use std::time::Duration;

use thiserror::Error;

use crate::hardware::ErrCode;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Device list failed to build: {0}")]
    DeviceList(String),

    #[error("No connected devices with type id {0}, please connect one")]
    NoDeviceFound(u32),

    #[error("Actuator error: {0}")]
    Actuator(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("{location} returned error {code}: {text}")]
    Sensor {
        location: String,
        code: ErrCode,
        text: String,
    },

    #[error("Sensor transmits {found} video signals, {expected} required")]
    MissingVideoSignals { expected: usize, found: usize },

    #[error("Video signal '{name}' delivered {actual} samples, expected {expected}")]
    ShortVideoSignal {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Channel length mismatch: {left} vs {right} samples")]
    ChannelLengthMismatch { left: usize, right: usize },

    #[error("Invalid angle range: {0}")]
    InvalidRange(String),

    #[error("Invalid angle '{0}'")]
    InvalidAngle(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}
