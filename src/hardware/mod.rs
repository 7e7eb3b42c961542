//! Vendor SDK seams.
//!
//! The actuator and the sensor are reached through vendor libraries that this
//! crate treats as black boxes. Each library is represented by a trait:
//!
//! - [`DeviceManager`] + [`RotationStage`]: the motion-control library
//!   (device list, one controller handle per serial number).
//! - [`SensorSdk`]: the sensor library's named-parameter and command API.
//!
//! Backends:
//! - [`simulated`] - in-process devices, used by default and by the tests
//! - `kinesis` - Thorlabs Kinesis KCube DC servo C API (feature `kinesis`)
//! - `medaqlib` - Micro-Epsilon MEDAQLib (feature `medaqlib`)

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::angle::Angle;
use crate::config::{Backend, Settings};
use crate::error::AppResult;

pub mod simulated;

#[cfg(feature = "kinesis")]
pub mod kinesis;

#[cfg(feature = "medaqlib")]
pub mod medaqlib;

// =============================================================================
// Actuator side
// =============================================================================

/// How the controller interprets absolute positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Positions are unbounded linear travel
    LinearRange,
    /// Positions accumulate over full turns
    RotationalUnlimited,
    /// Positions are wrapped into a single turn
    RotationalRange,
}

/// Direction chosen for rotational moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationDirection {
    /// Shortest way round
    Quickest,
    /// Always forwards
    Forwards,
    /// Always backwards
    Backwards,
}

/// Identification reported by a connected controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Controller serial number
    pub serial: String,
    /// Model name
    pub name: String,
}

/// One rotation controller handle.
///
/// Blocking operations take the timeout the vendor call would take; running
/// past it yields [`SweepError::Timeout`](crate::error::SweepError::Timeout). No operation retries.
#[async_trait]
pub trait RotationStage: Send {
    /// Open the connection to the controller.
    async fn connect(&mut self) -> AppResult<()>;

    /// Block until the controller has reported its settings.
    async fn wait_for_settings_initialized(&mut self, timeout: Duration) -> AppResult<()>;

    /// Load the stored motor configuration for this controller.
    async fn load_configuration(&mut self) -> AppResult<()>;

    /// Start the controller's status polling.
    async fn start_polling(&mut self, interval: Duration) -> AppResult<()>;

    /// Energise the motor channel.
    async fn enable(&mut self) -> AppResult<()>;

    /// Select rotation mode and direction.
    async fn set_rotation_mode(
        &mut self,
        mode: RotationMode,
        direction: RotationDirection,
    ) -> AppResult<()>;

    /// Set maximum velocity (deg/s) and acceleration (deg/s²).
    async fn set_velocity(&mut self, max_velocity: f64, acceleration: f64) -> AppResult<()>;

    /// Run the homing sequence, blocking until done.
    async fn home(&mut self, timeout: Duration) -> AppResult<()>;

    /// Move to an absolute angle, blocking until done.
    async fn move_to(&mut self, angle: Angle, timeout: Duration) -> AppResult<()>;

    /// Current position.
    async fn position(&mut self) -> AppResult<Angle>;

    /// Stop status polling.
    async fn stop_polling(&mut self) -> AppResult<()>;

    /// De-energise the motor channel.
    async fn disable(&mut self) -> AppResult<()>;

    /// Close the connection.
    async fn disconnect(&mut self) -> AppResult<()>;

    /// Serial and model name.
    fn device_info(&self) -> DeviceInfo;
}

/// The motion-control library's device registry.
pub trait DeviceManager: Send {
    /// Enumerate connected controllers.
    fn build_device_list(&mut self) -> AppResult<()>;

    /// Serial numbers of enumerated controllers of the given type id.
    ///
    /// Type ids are the leading digits of the serial number.
    fn device_list(&self, type_id: u32) -> Vec<String>;

    /// Create a handle for a listed controller. Does not connect.
    fn create_stage(&mut self, serial: &str) -> AppResult<Box<dyn RotationStage>>;
}

// =============================================================================
// Sensor side
// =============================================================================

/// Status code returned by every sensor SDK call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrCode(pub i32);

impl ErrCode {
    /// Success
    pub const NO_ERROR: ErrCode = ErrCode(0);
    /// Interface could not be opened
    pub const CANNOT_OPEN: ErrCode = ErrCode(-2);
    /// Sensor not opened
    pub const NOT_OPEN: ErrCode = ErrCode(-3);
    /// No data available for the request
    pub const NO_SENSORDATA_AVAILABLE: ErrCode = ErrCode(-13);
    /// Unknown sensor command
    pub const UNKNOWN_SENSOR_COMMAND: ErrCode = ErrCode(-14);
    /// Parameter exists with another type
    pub const WRONG_PARAMETER: ErrCode = ErrCode(-18);
    /// Parameter does not exist
    pub const NOT_FOUND: ErrCode = ErrCode(-25);

    /// True for [`ErrCode::NO_ERROR`].
    pub fn is_ok(self) -> bool {
        self == Self::NO_ERROR
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a sensor SDK call.
pub type SdkResult<T> = Result<T, ErrCode>;

/// The sensor library's named-parameter API for one sensor instance.
///
/// Calls mirror the vendor API one to one. Errors are bare codes; the text
/// describing the most recent error is fetched with [`SensorSdk::last_error`].
pub trait SensorSdk: Send {
    /// Open the sensor over Ethernet.
    fn open_tcpip(&mut self, address: &str) -> SdkResult<()>;

    /// Close the sensor.
    fn close(&mut self) -> SdkResult<()>;

    /// Set an integer parameter.
    fn set_parameter_int(&mut self, name: &str, value: i32) -> SdkResult<()>;

    /// Set a floating point parameter.
    fn set_parameter_double(&mut self, name: &str, value: f64) -> SdkResult<()>;

    /// Set a string parameter.
    fn set_parameter_string(&mut self, name: &str, value: &str) -> SdkResult<()>;

    /// Read an integer parameter.
    fn get_parameter_int(&mut self, name: &str) -> SdkResult<i32>;

    /// Read a floating point parameter.
    fn get_parameter_double(&mut self, name: &str) -> SdkResult<f64>;

    /// Read a string parameter.
    fn get_parameter_string(&mut self, name: &str) -> SdkResult<String>;

    /// Read a binary parameter, at most `max_len` bytes.
    fn get_parameter_binary(&mut self, name: &str, max_len: usize) -> SdkResult<Vec<u8>>;

    /// Execute a sensor command with the parameters already set.
    fn exec_command(&mut self, command: &str) -> SdkResult<()>;

    /// Set one integer parameter and execute a command.
    fn set_int_exec_command(&mut self, command: &str, name: &str, value: i32) -> SdkResult<()>;

    /// Execute a command and read back one integer result.
    fn exec_command_get_int(&mut self, command: &str, name: &str) -> SdkResult<i32>;

    /// Text describing the most recent error.
    fn last_error(&mut self) -> String;
}

// =============================================================================
// Backend selection
// =============================================================================

/// Device handles for one run.
pub struct Backends {
    /// Actuator device registry
    pub devices: Box<dyn DeviceManager>,
    /// Sensor instance
    pub sensor: Box<dyn SensorSdk>,
}

/// Create the backends selected by `application.backend`.
///
/// # Errors
/// - `FeatureNotEnabled` if hardware is requested without the vendor features
/// - vendor library failures while creating the sensor instance
pub fn connect_backends(settings: &Settings) -> AppResult<Backends> {
    match settings.application.backend {
        Backend::Simulated => Ok(Backends {
            devices: Box::new(simulated::SimulatedDeviceManager::from_config(
                &settings.simulation,
            )),
            sensor: Box::new(simulated::SimulatedSensor::from_config(
                &settings.simulation,
                settings.sensor.video_samples,
            )),
        }),
        Backend::Hardware => hardware_backends(settings),
    }
}

#[cfg(all(feature = "kinesis", feature = "medaqlib"))]
fn hardware_backends(settings: &Settings) -> AppResult<Backends> {
    Ok(Backends {
        devices: Box::new(kinesis::KinesisDeviceManager::new()),
        sensor: Box::new(medaqlib::MedaqSensor::create(&settings.sensor.model)?),
    })
}

#[cfg(not(all(feature = "kinesis", feature = "medaqlib")))]
fn hardware_backends(_settings: &Settings) -> AppResult<Backends> {
    let missing = if cfg!(feature = "kinesis") {
        "medaqlib"
    } else {
        "kinesis"
    };
    Err(crate::error::SweepError::FeatureNotEnabled(
        missing.to_string(),
    ))
}
