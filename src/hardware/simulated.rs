//! Simulated Hardware Implementations
//!
//! In-process stand-ins for both vendor libraries, for dry runs and tests.
//! Motion and settling use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! # Available Simulations
//!
//! - `SimulatedDeviceManager` / `SimulatedStage` - controller registry and a
//!   rotation stage moving at its configured velocity
//! - `SimulatedSensor` - named-parameter sensor producing synthetic video
//!   signals
//!
//! Every stage operation is appended to a shared [`Journal`], which is how
//! tests observe the order of hardware calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BufMut;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

use crate::angle::Angle;
use crate::config::SimulationConfig;
use crate::error::{AppResult, SweepError};
use crate::hardware::{
    DeviceInfo, DeviceManager, ErrCode, RotationDirection, RotationMode, RotationStage, SdkResult,
    SensorSdk,
};

// =============================================================================
// Journal
// =============================================================================

/// Ordered record of simulated hardware calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    /// Snapshot of all entries so far.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Number of entries starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

// =============================================================================
// SimulatedDeviceManager
// =============================================================================

/// Simulated controller registry.
pub struct SimulatedDeviceManager {
    serials: Vec<String>,
    fail_build: bool,
    built: bool,
    journal: Journal,
}

impl SimulatedDeviceManager {
    /// Registry holding the given controller serials.
    pub fn new(serials: Vec<String>) -> Self {
        Self {
            serials,
            fail_build: false,
            built: false,
            journal: Journal::default(),
        }
    }

    /// Registry built from the `[simulation]` settings.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let mut manager = Self::new(config.serials.clone());
        manager.fail_build = config.fail_device_list;
        manager
    }

    /// Make `build_device_list` fail.
    pub fn failing() -> Self {
        let mut manager = Self::new(Vec::new());
        manager.fail_build = true;
        manager
    }

    /// Shared call journal of this registry and every stage it creates.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl DeviceManager for SimulatedDeviceManager {
    fn build_device_list(&mut self) -> AppResult<()> {
        self.journal.record("build_device_list");
        if self.fail_build {
            return Err(SweepError::DeviceList(
                "simulated device enumeration failure".into(),
            ));
        }
        self.built = true;
        Ok(())
    }

    fn device_list(&self, type_id: u32) -> Vec<String> {
        if !self.built {
            return Vec::new();
        }
        let prefix = type_id.to_string();
        self.serials
            .iter()
            .filter(|s| s.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn create_stage(&mut self, serial: &str) -> AppResult<Box<dyn RotationStage>> {
        self.journal.record(format!("create_stage {}", serial));
        if !self.serials.iter().any(|s| s == serial) {
            return Err(SweepError::Actuator(format!(
                "no controller with serial {}",
                serial
            )));
        }
        Ok(Box::new(SimulatedStage::new(serial, self.journal.clone())))
    }
}

// =============================================================================
// SimulatedStage
// =============================================================================

/// Simulated rotation stage.
///
/// Moves take `distance / max_velocity` seconds. A move whose travel time
/// exceeds its timeout fails with `SweepError::Timeout` without moving, the
/// way a blocking vendor call gives up.
pub struct SimulatedStage {
    serial: String,
    journal: Journal,
    connected: bool,
    settings_ready: bool,
    polling: Option<Duration>,
    enabled: bool,
    mode: RotationMode,
    velocity_deg_per_sec: f64,
    position: Angle,
}

impl SimulatedStage {
    /// Disconnected stage at 0°, 10 deg/s.
    pub fn new(serial: &str, journal: Journal) -> Self {
        Self {
            serial: serial.to_string(),
            journal,
            connected: false,
            settings_ready: false,
            polling: None,
            enabled: false,
            mode: RotationMode::RotationalRange,
            velocity_deg_per_sec: 10.0,
            position: Angle::ZERO,
        }
    }

    fn require_connected(&self, operation: &str) -> AppResult<()> {
        if !self.connected {
            return Err(SweepError::Actuator(format!(
                "{}: controller {} not connected",
                operation, self.serial
            )));
        }
        Ok(())
    }

    fn require_enabled(&self, operation: &str) -> AppResult<()> {
        self.require_connected(operation)?;
        if !self.enabled {
            return Err(SweepError::Actuator(format!(
                "{}: controller {} not enabled",
                operation, self.serial
            )));
        }
        Ok(())
    }

    /// Wrap into a single turn when in rotational range mode.
    fn normalise(&self, angle: Angle) -> Angle {
        match self.mode {
            RotationMode::RotationalRange => {
                Angle::from_millidegrees(angle.millidegrees().rem_euclid(360_000))
            }
            _ => angle,
        }
    }

    async fn travel(&mut self, operation: &str, target: Angle, timeout: Duration) -> AppResult<()> {
        let distance = (target.degrees() - self.position.degrees()).abs();
        let travel = Duration::from_secs_f64(distance / self.velocity_deg_per_sec);
        if travel > timeout {
            return Err(SweepError::Timeout {
                operation: format!("{} on {}", operation, self.serial),
                timeout,
            });
        }
        sleep(travel).await;
        self.position = target;
        Ok(())
    }
}

#[async_trait]
impl RotationStage for SimulatedStage {
    async fn connect(&mut self) -> AppResult<()> {
        self.journal.record("connect");
        self.connected = true;
        Ok(())
    }

    async fn wait_for_settings_initialized(&mut self, _timeout: Duration) -> AppResult<()> {
        self.journal.record("wait_for_settings_initialized");
        self.require_connected("wait_for_settings_initialized")?;
        self.settings_ready = true;
        Ok(())
    }

    async fn load_configuration(&mut self) -> AppResult<()> {
        self.journal.record("load_configuration");
        self.require_connected("load_configuration")?;
        if !self.settings_ready {
            return Err(SweepError::Actuator(
                "load_configuration: settings not initialized".into(),
            ));
        }
        Ok(())
    }

    async fn start_polling(&mut self, interval: Duration) -> AppResult<()> {
        self.journal.record(format!("start_polling {}ms", interval.as_millis()));
        self.require_connected("start_polling")?;
        self.polling = Some(interval);
        Ok(())
    }

    async fn enable(&mut self) -> AppResult<()> {
        self.journal.record("enable");
        self.require_connected("enable")?;
        self.enabled = true;
        Ok(())
    }

    async fn set_rotation_mode(
        &mut self,
        mode: RotationMode,
        direction: RotationDirection,
    ) -> AppResult<()> {
        self.journal
            .record(format!("set_rotation_mode {:?} {:?}", mode, direction));
        self.require_connected("set_rotation_mode")?;
        self.mode = mode;
        Ok(())
    }

    async fn set_velocity(&mut self, max_velocity: f64, acceleration: f64) -> AppResult<()> {
        self.journal
            .record(format!("set_velocity {} {}", max_velocity, acceleration));
        self.require_connected("set_velocity")?;
        if max_velocity <= 0.0 || acceleration <= 0.0 {
            return Err(SweepError::Actuator(format!(
                "invalid velocity parameters {} / {}",
                max_velocity, acceleration
            )));
        }
        self.velocity_deg_per_sec = max_velocity;
        Ok(())
    }

    async fn home(&mut self, timeout: Duration) -> AppResult<()> {
        self.journal.record("home");
        self.require_enabled("home")?;
        self.travel("home", Angle::ZERO, timeout).await
    }

    async fn move_to(&mut self, angle: Angle, timeout: Duration) -> AppResult<()> {
        self.journal.record(format!("move_to {}", angle));
        self.require_enabled("move_to")?;
        let target = self.normalise(angle);
        self.travel("move_to", target, timeout).await
    }

    async fn position(&mut self) -> AppResult<Angle> {
        self.require_connected("position")?;
        Ok(self.position)
    }

    async fn stop_polling(&mut self) -> AppResult<()> {
        self.journal.record("stop_polling");
        self.polling = None;
        Ok(())
    }

    async fn disable(&mut self) -> AppResult<()> {
        self.journal.record("disable");
        self.require_connected("disable")?;
        self.enabled = false;
        Ok(())
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        self.journal.record("disconnect");
        if self.polling.is_some() {
            tracing::warn!(serial = %self.serial, "Disconnecting while polling is active");
        }
        self.connected = false;
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            serial: self.serial.clone(),
            name: "Simulated KCube DC Servo".to_string(),
        }
    }
}

// =============================================================================
// SimulatedSensor
// =============================================================================

#[derive(Debug, Clone)]
enum Value {
    Int(i32),
    Double(f64),
    Text(String),
}

const VIDEO_SIGNAL_NAMES: [&str; 4] = ["VideoRaw", "VideoLightCorr", "VideoDarkCorr", "VideoCorr"];
const VIDEO_OUTPUT_PARAM: &str = "SP_OutputVideoRaw_Ch1_ETH";

/// Simulated confocal sensor.
///
/// Holds a parameter table like the vendor library does. Video signals are
/// only announced (`IA_VideoSignalsPerFrame`) once video output has been
/// switched on, and not at all when configured with zero video signals.
pub struct SimulatedSensor {
    params: HashMap<String, Value>,
    binary: HashMap<String, Vec<u8>>,
    open: bool,
    video_output: bool,
    video_signals: usize,
    samples: usize,
    frames: u32,
    last_error: String,
    rng: StdRng,
    journal: Journal,
}

impl SimulatedSensor {
    /// Sensor announcing `video_signals` signals of `samples` pixels each.
    pub fn new(video_signals: usize, samples: usize) -> Self {
        let mut params = HashMap::new();
        params.insert("SA_SerialNumber".into(), Value::Text("2422000001".into()));
        params.insert("SA_Range".into(), Value::Double(3.0));
        params.insert("IA_ValuesPerFrame".into(), Value::Int(2));
        params.insert("IA_MaxValuesPerFrame".into(), Value::Int(40));
        params.insert("IA_MaxOutputIndex".into(), Value::Int(36));
        params.insert("IA_Samplerate".into(), Value::Double(1_000.0));
        params.insert("IA_Datarate".into(), Value::Double(1_000.0));

        for (i, name) in ["Distance1", "Intensity1"].iter().enumerate() {
            let n = i + 1;
            let unit = if i == 0 { "mm" } else { "%" };
            params.insert(format!("IA_Index{}", n), Value::Int(n as i32));
            params.insert(format!("IA_Raw_Name{}", n), Value::Text(name.to_string()));
            params.insert(format!("IA_Scaled_Name{}", n), Value::Text(name.to_string()));
            params.insert(format!("IA_Raw_Unit{}", n), Value::Text(String::new()));
            params.insert(format!("IA_Scaled_Unit{}", n), Value::Text(unit.into()));
            params.insert(format!("IA_Raw_RangeMin{}", n), Value::Double(0.0));
            params.insert(format!("IA_Raw_RangeMax{}", n), Value::Double(32_767.0));
            params.insert(format!("IA_Scaled_RangeMin{}", n), Value::Double(0.0));
            params.insert(
                format!("IA_Scaled_RangeMax{}", n),
                Value::Double(if i == 0 { 3.0 } else { 100.0 }),
            );
        }

        Self {
            params,
            binary: HashMap::new(),
            open: false,
            video_output: false,
            video_signals,
            samples,
            frames: 0,
            last_error: String::new(),
            rng: StdRng::seed_from_u64(0x2422),
            journal: Journal::default(),
        }
    }

    /// Sensor built from the `[simulation]` settings.
    pub fn from_config(config: &SimulationConfig, samples: usize) -> Self {
        Self::new(config.video_signals, samples)
    }

    /// Journal of open, close and command calls, entries prefixed `sensor `.
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Remove a parameter, as if the firmware did not provide it.
    pub fn remove_parameter(&mut self, name: &str) {
        self.params.remove(name);
    }

    fn fail<T>(&mut self, code: ErrCode, text: impl Into<String>) -> SdkResult<T> {
        self.last_error = text.into();
        Err(code)
    }

    fn require_open(&mut self) -> SdkResult<()> {
        if !self.open {
            return self.fail(ErrCode::NOT_OPEN, "Sensor not opened");
        }
        Ok(())
    }

    fn lookup(&mut self, name: &str) -> SdkResult<Value> {
        match self.params.get(name) {
            Some(value) => Ok(value.clone()),
            None => self.fail(ErrCode::NOT_FOUND, format!("Parameter {} not found", name)),
        }
    }

    fn wrong_type<T>(&mut self, name: &str, expected: &str) -> SdkResult<T> {
        self.fail(
            ErrCode::WRONG_PARAMETER,
            format!("Parameter {} is not of type {}", name, expected),
        )
    }

    fn set_video_output(&mut self, enabled: bool) {
        self.video_output = enabled;
        if enabled && self.video_signals > 0 {
            self.params.insert(
                "IA_VideoSignalsPerFrame".into(),
                Value::Int(self.video_signals as i32),
            );
            for i in 0..self.video_signals {
                let n = i + 1;
                let name = VIDEO_SIGNAL_NAMES[i % VIDEO_SIGNAL_NAMES.len()];
                self.params
                    .insert(format!("IA_VideoSignalName{}", n), Value::Text(name.into()));
                self.params.insert(
                    format!("IA_VideoSignalPixelCount{}", n),
                    Value::Int(self.samples as i32),
                );
                self.params
                    .insert(format!("IA_VideoSignalPixelByteSize{}", n), Value::Int(2));
            }
        } else {
            self.params.remove("IA_VideoSignalsPerFrame");
        }
    }

    /// One synthetic peak per signal, drifting a little every frame.
    fn synthesize_frame(&mut self) {
        self.frames += 1;
        let samples = self.samples;
        let count = self.video_signals.min(VIDEO_SIGNAL_NAMES.len());

        for (signal, name) in VIDEO_SIGNAL_NAMES.iter().take(count).enumerate() {
            let center = (samples / 4 + (self.frames as usize * 3 + signal * 5) % (samples / 2).max(1))
                as f64;
            let mut buf = Vec::with_capacity(samples * 2);
            for px in 0..samples {
                let d = (px as f64 - center) / 12.0;
                let peak = 20_000.0 * (-0.5 * d * d).exp();
                let noise: f64 = self.rng.gen_range(-40.0..40.0);
                let value = (300.0 + peak + noise).clamp(0.0, i16::MAX as f64);
                buf.put_i16_le(value as i16);
            }
            self.binary.insert(name.to_string(), buf);
        }
    }
}

impl SensorSdk for SimulatedSensor {
    fn open_tcpip(&mut self, address: &str) -> SdkResult<()> {
        self.journal.record(format!("sensor open {}", address));
        if self.open {
            return self.fail(ErrCode::CANNOT_OPEN, "Sensor already opened");
        }
        if address.is_empty() {
            return self.fail(ErrCode::CANNOT_OPEN, "No remote address given");
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> SdkResult<()> {
        self.journal.record("sensor close");
        self.require_open()?;
        self.open = false;
        Ok(())
    }

    fn set_parameter_int(&mut self, name: &str, value: i32) -> SdkResult<()> {
        self.params.insert(name.to_string(), Value::Int(value));
        Ok(())
    }

    fn set_parameter_double(&mut self, name: &str, value: f64) -> SdkResult<()> {
        self.params.insert(name.to_string(), Value::Double(value));
        Ok(())
    }

    fn set_parameter_string(&mut self, name: &str, value: &str) -> SdkResult<()> {
        self.params
            .insert(name.to_string(), Value::Text(value.to_string()));
        Ok(())
    }

    fn get_parameter_int(&mut self, name: &str) -> SdkResult<i32> {
        match self.lookup(name)? {
            Value::Int(v) => Ok(v),
            _ => self.wrong_type(name, "int"),
        }
    }

    fn get_parameter_double(&mut self, name: &str) -> SdkResult<f64> {
        match self.lookup(name)? {
            Value::Double(v) => Ok(v),
            Value::Int(v) => Ok(f64::from(v)),
            _ => self.wrong_type(name, "double"),
        }
    }

    fn get_parameter_string(&mut self, name: &str) -> SdkResult<String> {
        match self.lookup(name)? {
            Value::Text(v) => Ok(v),
            _ => self.wrong_type(name, "string"),
        }
    }

    fn get_parameter_binary(&mut self, name: &str, max_len: usize) -> SdkResult<Vec<u8>> {
        match self.binary.get(name) {
            Some(data) => Ok(data[..data.len().min(max_len)].to_vec()),
            None => self.fail(ErrCode::NOT_FOUND, format!("Parameter {} not found", name)),
        }
    }

    fn exec_command(&mut self, command: &str) -> SdkResult<()> {
        self.journal.record(format!("sensor {}", command));
        self.run_command(command)
    }

    fn set_int_exec_command(&mut self, command: &str, name: &str, value: i32) -> SdkResult<()> {
        self.journal
            .record(format!("sensor {} {}={}", command, name, value));
        self.set_parameter_int(name, value)?;
        if command == "Update_Output_ETH" && name == VIDEO_OUTPUT_PARAM {
            self.require_open()?;
            self.set_video_output(value != 0);
            return Ok(());
        }
        match command {
            "Update_DataOutInterface" | "Update_Output_ETH" => self.require_open(),
            _ => self.run_command(command),
        }
    }

    fn exec_command_get_int(&mut self, command: &str, name: &str) -> SdkResult<i32> {
        self.exec_command(command)?;
        self.get_parameter_int(name)
    }

    fn last_error(&mut self) -> String {
        self.last_error.clone()
    }
}

impl SimulatedSensor {
    fn run_command(&mut self, command: &str) -> SdkResult<()> {
        self.require_open()?;
        match command {
            "Get_VideoStreamSignal" => {
                if !self.video_output || self.video_signals == 0 {
                    return self.fail(
                        ErrCode::NO_SENSORDATA_AVAILABLE,
                        "No video signal transmitted",
                    );
                }
                self.synthesize_frame();
                Ok(())
            }
            "Get_AllParameters" | "Get_TransmittedDataInfo" => Ok(()),
            _ => self.fail(
                ErrCode::UNKNOWN_SENSOR_COMMAND,
                format!("Unknown sensor command {}", command),
            ),
        }
    }
}
