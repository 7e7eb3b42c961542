//! Configuration system using Figment
//!
//! Every address, serial prefix, timeout, delay and the sweep itself is a
//! setting. Configuration is layered (lowest to highest precedence):
//! 1. Built-in defaults (`Settings::default()`)
//! 2. TOML configuration file (default: `config/sweep.toml`)
//! 3. Environment variables prefixed with `SWEEP_`, nested keys joined by `__`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SWEEP_APPLICATION__LOG_LEVEL=debug
//! SWEEP_SENSOR__ADDRESS=192.168.0.10
//! SWEEP_SWEEP__STEP=2.5
//! SWEEP_ACTUATOR__MOVE_TIMEOUT=15s
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sweep_daq::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("Sensor: {} at {}", settings.sensor.model, settings.sensor.address);
//!     println!("Angles: {}", settings.angles()?.len());
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::angle::{linear_range, Angle};
use crate::error::{AppResult, SweepError};
use crate::hardware::{RotationDirection, RotationMode};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "config/sweep.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SWEEP_";

/// Largest sweep start, stop or step magnitude accepted, in degrees
pub const MAX_SWEEP_DEGREES: f64 = 1.0e6;

/// Finite and strictly positive; rejects NaN.
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Rotation controller settings
    pub actuator: ActuatorConfig,
    /// Optical sensor settings
    pub sensor: SensorConfig,
    /// Angle sweep
    pub sweep: SweepConfig,
    /// CSV output
    pub output: OutputConfig,
    /// Simulated backend behaviour
    pub simulation: SimulationConfig,
}

/// Which device implementations to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process simulated devices
    #[default]
    Simulated,
    /// Vendor libraries (needs the `hardware` feature)
    Hardware,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log line format (text, json)
    pub log_format: String,
    /// Device backend
    pub backend: Backend,
}

/// Rotation controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Controller type id; detected serial numbers start with it
    pub device_type_id: u32,
    /// Wait for the controller to report its settings
    #[serde(with = "humantime_serde")]
    pub settings_timeout: Duration,
    /// Controller status polling interval
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,
    /// Settling time after starting polling and after enabling
    #[serde(with = "humantime_serde")]
    pub enable_settle: Duration,
    /// Rotation mode
    pub rotation_mode: RotationMode,
    /// Rotation direction
    pub rotation_direction: RotationDirection,
    /// Maximum velocity in deg/s
    pub max_velocity: f64,
    /// Acceleration in deg/s²
    pub acceleration: f64,
    /// Homing timeout
    #[serde(with = "humantime_serde")]
    pub home_timeout: Duration,
    /// Settling time after homing
    #[serde(with = "humantime_serde")]
    pub home_settle: Duration,
    /// Timeout for each absolute move
    #[serde(with = "humantime_serde")]
    pub move_timeout: Duration,
    /// Settling time after each move
    #[serde(with = "humantime_serde")]
    pub move_settle: Duration,
    /// Timeout for moves entered interactively
    #[serde(with = "humantime_serde")]
    pub goto_move_timeout: Duration,
}

/// Optical sensor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Sensor model name passed to the SDK (e.g., "IFC2422")
    pub model: String,
    /// Sensor IP address
    pub address: String,
    /// Wait before opening the sensor
    #[serde(with = "humantime_serde")]
    pub startup_delay: Duration,
    /// Enable the SDK's own interface log
    pub sdk_logging: bool,
    /// Samples per video signal
    pub video_samples: usize,
    /// Pause before requesting a video signal
    #[serde(with = "humantime_serde")]
    pub video_prepare_delay: Duration,
    /// SDK read mode for video requests (2 = automatic)
    pub video_read_mode: i32,
    /// Sensor-side wait for a video signal
    #[serde(with = "humantime_serde")]
    pub video_timeout: Duration,
}

/// Sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// First angle in degrees
    pub start: f64,
    /// Last angle bound in degrees
    pub stop: f64,
    /// Step in degrees (non-zero, may be negative)
    pub step: f64,
    /// Number of passes over the angle set
    pub repetitions: u32,
    /// Pause after each saved step
    #[serde(with = "humantime_serde")]
    pub step_delay: Duration,
    /// Pause after the final homing
    #[serde(with = "humantime_serde")]
    pub final_delay: Duration,
}

/// CSV output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    /// Width the angle is zero-padded to in file names
    pub angle_width: usize,
}

/// Simulated backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Serial numbers of simulated controllers
    pub serials: Vec<String>,
    /// Make building the device list fail
    pub fail_device_list: bool,
    /// Video signals the simulated sensor transmits (0 = feature absent)
    pub video_signals: usize,
}

// ============================================================================
// Defaults
// ============================================================================

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            backend: Backend::Simulated,
        }
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            device_type_id: 27, // KCube DC servo
            settings_timeout: Duration::from_millis(9_000),
            polling_interval: Duration::from_millis(250),
            enable_settle: Duration::from_millis(1_000),
            rotation_mode: RotationMode::RotationalRange,
            rotation_direction: RotationDirection::Quickest,
            max_velocity: 50.0,
            acceleration: 100.0,
            home_timeout: Duration::from_millis(60_000),
            home_settle: Duration::from_millis(1_000),
            move_timeout: Duration::from_millis(9_000),
            move_settle: Duration::from_millis(1_000),
            goto_move_timeout: Duration::from_millis(60_000),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            model: "IFC2422".to_string(),
            address: "169.254.168.150".to_string(),
            startup_delay: Duration::from_millis(4_300),
            sdk_logging: false,
            video_samples: 512,
            video_prepare_delay: Duration::from_millis(100),
            video_read_mode: 2,
            video_timeout: Duration::from_millis(500),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            stop: 359.0,
            step: 5.0,
            repetitions: 1,
            step_delay: Duration::from_millis(500),
            final_delay: Duration::from_millis(2_000),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            prefix: "sweep".to_string(),
            angle_width: 3,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            serials: vec!["27000001".to_string()],
            fail_device_list: false,
            video_signals: 2,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `config/sweep.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and log format are known
    /// - Sensor model, address and output prefix are not empty
    /// - Timeouts are non-zero, velocity and acceleration positive
    /// - Video samples and repetitions are non-zero
    /// - The sweep produces a valid angle set
    ///
    /// # Errors
    ///
    /// Returns `SweepError::Configuration` with a descriptive message.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.sensor.model.is_empty() {
            return Err(SweepError::Configuration(
                "sensor 'model' cannot be empty".into(),
            ));
        }
        if self.sensor.address.is_empty() {
            return Err(SweepError::Configuration(
                "sensor 'address' cannot be empty".into(),
            ));
        }
        if self.sensor.video_samples == 0 {
            return Err(SweepError::Configuration(
                "sensor 'video_samples' must be > 0".into(),
            ));
        }

        let timeouts = [
            ("settings_timeout", self.actuator.settings_timeout),
            ("home_timeout", self.actuator.home_timeout),
            ("move_timeout", self.actuator.move_timeout),
            ("goto_move_timeout", self.actuator.goto_move_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                return Err(SweepError::Configuration(format!(
                    "actuator '{}' must be > 0",
                    name
                )));
            }
        }
        if !is_positive(self.actuator.max_velocity) || !is_positive(self.actuator.acceleration) {
            return Err(SweepError::Configuration(format!(
                "actuator velocity parameters must be positive (max_velocity {}, acceleration {})",
                self.actuator.max_velocity, self.actuator.acceleration
            )));
        }

        if self.sweep.repetitions == 0 {
            return Err(SweepError::Configuration(
                "sweep 'repetitions' must be > 0".into(),
            ));
        }
        let bounds = [
            ("start", self.sweep.start),
            ("stop", self.sweep.stop),
            ("step", self.sweep.step),
        ];
        for (name, value) in bounds {
            if !value.is_finite() || value.abs() > MAX_SWEEP_DEGREES {
                return Err(SweepError::Configuration(format!(
                    "sweep '{}' must be a finite angle within ±{} deg, got {}",
                    name, MAX_SWEEP_DEGREES, value
                )));
            }
        }
        self.angles()
            .map_err(|e| SweepError::Configuration(format!("sweep: {}", e)))?;

        if self.output.prefix.is_empty() {
            return Err(SweepError::Configuration(
                "output 'prefix' cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Render the settings as TOML, in the layout `load_from` reads.
    ///
    /// # Errors
    /// Returns `SweepError::Configuration` if serialization fails.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SweepError::Configuration(format!("cannot render settings: {}", e)))
    }

    /// The ordered angle set visited on each pass.
    ///
    /// # Errors
    /// Returns `SweepError::InvalidRange` for a zero or misdirected step.
    pub fn angles(&self) -> AppResult<Vec<Angle>> {
        linear_range(
            Angle::from_degrees(self.sweep.start),
            Angle::from_degrees(self.sweep.stop),
            Angle::from_degrees(self.sweep.step),
        )
    }
}
