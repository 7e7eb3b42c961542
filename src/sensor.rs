//! Optical sensor facade.
//!
//! Wraps one [`SensorSdk`] instance. Every SDK call yields a status code; a
//! failing call is logged with its location and the SDK's error text and is
//! returned as `SweepError::Sensor`. Frame-layout parameters that a firmware
//! may not provide are queried as optional: their absence is logged at debug
//! level and reported as `None`, never as a failure.

use std::time::Duration;

use bytes::Buf;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SensorConfig;
use crate::error::{AppResult, SweepError};
use crate::hardware::{ErrCode, SdkResult, SensorSdk};

/// Number of video signals captured per step (one CSV column each)
pub const VIDEO_CHANNELS: usize = 2;

/// Static sensor identification.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    /// Sensor serial number
    pub serial: String,
    /// Measuring range in mm
    pub range_mm: f64,
}

/// Description of one value in a transmitted frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelInfo {
    /// Output index
    pub index: Option<i32>,
    /// Raw value name
    pub raw_name: Option<String>,
    /// Scaled value name
    pub scaled_name: Option<String>,
    /// Raw value unit
    pub raw_unit: Option<String>,
    /// Scaled value unit
    pub scaled_unit: Option<String>,
    /// Raw value range
    pub raw_range: (Option<f64>, Option<f64>),
    /// Scaled value range
    pub scaled_range: (Option<f64>, Option<f64>),
}

/// One announced video signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSignalInfo {
    /// Signal name, also the name of the binary parameter carrying it
    pub name: String,
    /// Pixels per signal
    pub pixel_count: i32,
    /// Bytes per pixel
    pub pixel_byte_size: i32,
}

impl VideoSignalInfo {
    /// Signal length in bytes.
    pub fn byte_len(&self) -> i64 {
        i64::from(self.pixel_count) * i64::from(self.pixel_byte_size)
    }
}

/// What the sensor currently transmits per frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameLayout {
    /// Values transmitted per frame
    pub values_per_frame: i32,
    /// Maximum possible values per frame
    pub max_values_per_frame: Option<i32>,
    /// Maximum output index
    pub max_output_index: Option<i32>,
    /// Per-value descriptions
    pub channels: Vec<ChannelInfo>,
    /// Sample rate in Hz
    pub sample_rate: Option<f64>,
    /// Data rate in Hz
    pub data_rate: Option<f64>,
    /// Announced video signals, empty if the sensor has none
    pub video_signals: Vec<VideoSignalInfo>,
}

impl FrameLayout {
    /// True if the sensor announces video signals.
    pub fn has_video(&self) -> bool {
        !self.video_signals.is_empty()
    }
}

/// Decoded video signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSignal {
    /// Signal name
    pub name: String,
    /// Pixel values
    pub samples: Vec<i16>,
}

/// The video signals captured at one sweep step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Captured signals, `VIDEO_CHANNELS` of them
    pub signals: Vec<VideoSignal>,
}

/// Facade over one sensor instance.
pub struct Sensor {
    sdk: Box<dyn SensorSdk>,
    config: SensorConfig,
}

impl Sensor {
    /// Wrap an SDK instance. Does not open the sensor.
    pub fn new(sdk: Box<dyn SensorSdk>, config: SensorConfig) -> Self {
        Self { sdk, config }
    }

    /// Fetch the error text for `code`, log it and build the error.
    fn fail(&mut self, location: &str, code: ErrCode) -> SweepError {
        let text = self.sdk.last_error();
        error!(location, code = code.0, "{} returned error: {}", location, text);
        SweepError::Sensor {
            location: location.to_string(),
            code,
            text,
        }
    }

    /// Tolerate a missing parameter.
    fn optional<T>(&mut self, name: &str, result: SdkResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(code) => {
                let text = self.sdk.last_error();
                debug!(parameter = name, code = code.0, %text, "Optional parameter not available");
                None
            }
        }
    }

    fn optional_int(&mut self, name: &str) -> Option<i32> {
        let result = self.sdk.get_parameter_int(name);
        self.optional(name, result)
    }

    fn optional_double(&mut self, name: &str) -> Option<f64> {
        let result = self.sdk.get_parameter_double(name);
        self.optional(name, result)
    }

    fn optional_string(&mut self, name: &str) -> Option<String> {
        let result = self.sdk.get_parameter_string(name);
        self.optional(name, result)
    }

    // -------------------------------------------------------------------------
    // Named parameters and commands
    // -------------------------------------------------------------------------

    /// Set an integer parameter.
    pub fn set_parameter_int(&mut self, name: &str, value: i32) -> AppResult<()> {
        self.sdk
            .set_parameter_int(name, value)
            .map_err(|code| self.fail(&format!("SetParameterInt ({})", name), code))
    }

    /// Set a floating point parameter.
    pub fn set_parameter_double(&mut self, name: &str, value: f64) -> AppResult<()> {
        self.sdk
            .set_parameter_double(name, value)
            .map_err(|code| self.fail(&format!("SetParameterDouble ({})", name), code))
    }

    /// Set a string parameter.
    pub fn set_parameter_string(&mut self, name: &str, value: &str) -> AppResult<()> {
        self.sdk
            .set_parameter_string(name, value)
            .map_err(|code| self.fail(&format!("SetParameterString ({})", name), code))
    }

    /// Read an integer parameter.
    pub fn get_parameter_int(&mut self, name: &str) -> AppResult<i32> {
        self.sdk
            .get_parameter_int(name)
            .map_err(|code| self.fail(&format!("GetParameterInt ({})", name), code))
    }

    /// Read a floating point parameter.
    pub fn get_parameter_double(&mut self, name: &str) -> AppResult<f64> {
        self.sdk
            .get_parameter_double(name)
            .map_err(|code| self.fail(&format!("GetParameterDouble ({})", name), code))
    }

    /// Read a string parameter.
    pub fn get_parameter_string(&mut self, name: &str) -> AppResult<String> {
        self.sdk
            .get_parameter_string(name)
            .map_err(|code| self.fail(&format!("GetParameterString ({})", name), code))
    }

    /// Read a binary parameter of at most `max_len` bytes.
    pub fn get_parameter_binary(&mut self, name: &str, max_len: usize) -> AppResult<Vec<u8>> {
        self.sdk
            .get_parameter_binary(name, max_len)
            .map_err(|code| self.fail(&format!("GetParameterBinary ({})", name), code))
    }

    /// Execute a named sensor command.
    pub fn execute(&mut self, command: &str) -> AppResult<()> {
        self.sdk
            .exec_command(command)
            .map_err(|code| self.fail(command, code))
    }

    /// Set one integer parameter and execute a named command.
    pub fn set_int_execute(&mut self, command: &str, name: &str, value: i32) -> AppResult<()> {
        self.sdk
            .set_int_exec_command(command, name, value)
            .map_err(|code| self.fail(&format!("SetIntExecSCmd ({})", command), code))
    }

    // -------------------------------------------------------------------------
    // Acquisition sequence
    // -------------------------------------------------------------------------

    /// Open the sensor over Ethernet.
    pub fn open(&mut self) -> AppResult<()> {
        info!(model = %self.config.model, address = %self.config.address, "Open sensor ...");

        let logging = i32::from(self.config.sdk_logging);
        if let Err(code) = self.sdk.set_parameter_int("IP_EnableLogging", logging) {
            warn!(code = code.0, "Could not configure SDK logging");
        }

        self.sdk
            .open_tcpip(&self.config.address)
            .map_err(|code| self.fail("OpenSensorTCPIP", code))
    }

    /// Read serial number and measuring range.
    pub fn read_info(&mut self) -> AppResult<SensorInfo> {
        info!("Get all parameters ...");
        self.sdk
            .set_int_exec_command("Get_AllParameters", "SP_Additional", 1)
            .map_err(|code| self.fail("SetIntExecSCmd (Get_AllParameters)", code))?;

        let serial = self
            .sdk
            .get_parameter_string("SA_SerialNumber")
            .map_err(|code| self.fail("GetParameterString (SA_SerialNumber)", code))?;
        info!("Sensor SerialNumber: {}", serial);

        let range_mm = self
            .sdk
            .get_parameter_double("SA_Range")
            .map_err(|code| self.fail("GetParameterDouble (SA_Range)", code))?;
        info!("Sensor range: {} mm", range_mm);

        Ok(SensorInfo { serial, range_mm })
    }

    /// Switch raw video output over Ethernet on or off.
    pub fn set_video_output(&mut self, enabled: bool) -> AppResult<()> {
        self.set_int_execute("Update_DataOutInterface", "SP_OutputEthernet", 1)?;
        self.set_int_execute(
            "Update_Output_ETH",
            "SP_OutputVideoRaw_Ch1_ETH",
            i32::from(enabled),
        )?;
        debug!(enabled, "Video output updated");
        Ok(())
    }

    /// Announced video signals; empty when the parameter is absent.
    pub fn video_signals(&mut self) -> Vec<VideoSignalInfo> {
        let count = self.optional_int("IA_VideoSignalsPerFrame").unwrap_or(0);
        if count <= 0 {
            return Vec::new();
        }
        info!("Sensor transmits {} video signals", count);

        (1..=count)
            .map(|n| {
                let signal = VideoSignalInfo {
                    name: self
                        .optional_string(&format!("IA_VideoSignalName{}", n))
                        .unwrap_or_default(),
                    pixel_count: self
                        .optional_int(&format!("IA_VideoSignalPixelCount{}", n))
                        .unwrap_or(0),
                    pixel_byte_size: self
                        .optional_int(&format!("IA_VideoSignalPixelByteSize{}", n))
                        .unwrap_or(0),
                };
                info!(
                    "{} ({} pixel each {} bytes) with length {} bytes",
                    signal.name,
                    signal.pixel_count,
                    signal.pixel_byte_size,
                    signal.byte_len()
                );
                signal
            })
            .collect()
    }

    /// Query what the sensor transmits per frame.
    ///
    /// Only the value count is required; everything else is optional.
    pub fn transmitted_data_info(&mut self) -> AppResult<FrameLayout> {
        let values_per_frame = self
            .sdk
            .exec_command_get_int("Get_TransmittedDataInfo", "IA_ValuesPerFrame")
            .map_err(|code| self.fail("Get_TransmittedDataInfo", code))?;

        let max_values_per_frame = self.optional_int("IA_MaxValuesPerFrame");
        let max_output_index = self.optional_int("IA_MaxOutputIndex");
        info!(
            "Sensor transmits {} of {} possible values, maximum output index is {}",
            values_per_frame,
            max_values_per_frame.unwrap_or(0),
            max_output_index.unwrap_or(0)
        );

        let mut channels = Vec::with_capacity(values_per_frame.max(0) as usize);
        for n in 1..=values_per_frame {
            let channel = ChannelInfo {
                index: self.optional_int(&format!("IA_Index{}", n)),
                raw_name: self.optional_string(&format!("IA_Raw_Name{}", n)),
                scaled_name: self.optional_string(&format!("IA_Scaled_Name{}", n)),
                raw_unit: self.optional_string(&format!("IA_Raw_Unit{}", n)),
                scaled_unit: self.optional_string(&format!("IA_Scaled_Unit{}", n)),
                raw_range: (
                    self.optional_double(&format!("IA_Raw_RangeMin{}", n)),
                    self.optional_double(&format!("IA_Raw_RangeMax{}", n)),
                ),
                scaled_range: (
                    self.optional_double(&format!("IA_Scaled_RangeMin{}", n)),
                    self.optional_double(&format!("IA_Scaled_RangeMax{}", n)),
                ),
            };
            info!(
                " {:2}: {} [{} .. {} {}], {} [{} .. {} {}]",
                channel.index.unwrap_or(0),
                channel.raw_name.as_deref().unwrap_or(""),
                channel.raw_range.0.unwrap_or(0.0),
                channel.raw_range.1.unwrap_or(0.0),
                channel.raw_unit.as_deref().unwrap_or(""),
                channel.scaled_name.as_deref().unwrap_or(""),
                channel.scaled_range.0.unwrap_or(0.0),
                channel.scaled_range.1.unwrap_or(0.0),
                channel.scaled_unit.as_deref().unwrap_or("")
            );
            channels.push(channel);
        }

        let sample_rate = self.optional_double("IA_Samplerate");
        let data_rate = self.optional_double("IA_Datarate");
        info!(
            "Samplerate: {} Hz, Datarate: {} Hz",
            sample_rate.unwrap_or(0.0),
            data_rate.unwrap_or(0.0)
        );

        let video_signals = self.video_signals();

        Ok(FrameLayout {
            values_per_frame,
            max_values_per_frame,
            max_output_index,
            channels,
            sample_rate,
            data_rate,
            video_signals,
        })
    }

    /// Request one video frame and decode the first two video signals.
    ///
    /// Returns `Ok(None)` when the sensor announces no video signals.
    ///
    /// # Errors
    /// - fewer than `VIDEO_CHANNELS` signals announced
    /// - the video request or a signal read fails
    /// - a signal is shorter than `video_samples`
    pub async fn capture_video(&mut self) -> AppResult<Option<VideoFrame>> {
        let announced = self.video_signals();
        if announced.is_empty() {
            return Ok(None);
        }
        if announced.len() < VIDEO_CHANNELS {
            return Err(SweepError::MissingVideoSignals {
                expected: VIDEO_CHANNELS,
                found: announced.len(),
            });
        }

        sleep(self.config.video_prepare_delay).await;

        self.set_parameter_int("SP_ReadMode", self.config.video_read_mode)?;
        self.set_parameter_int(
            "SP_WaitVideoTimeout",
            duration_ms(self.config.video_timeout),
        )?;
        self.execute("Get_VideoStreamSignal")?;

        let samples = self.config.video_samples;
        let mut signals = Vec::with_capacity(VIDEO_CHANNELS);
        for info in announced.into_iter().take(VIDEO_CHANNELS) {
            let raw = self.get_parameter_binary(&info.name, samples * 2)?;
            let decoded = decode_samples(&raw, samples);
            if decoded.len() < samples {
                return Err(SweepError::ShortVideoSignal {
                    name: info.name,
                    expected: samples,
                    actual: decoded.len(),
                });
            }
            signals.push(VideoSignal {
                name: info.name,
                samples: decoded,
            });
        }

        Ok(Some(VideoFrame { signals }))
    }

    /// Close the sensor.
    pub fn close(&mut self) -> AppResult<()> {
        self.sdk
            .close()
            .map_err(|code| self.fail("CloseSensor", code))
    }
}

/// Little-endian 16-bit pixels, at most `limit` of them.
fn decode_samples(raw: &[u8], limit: usize) -> Vec<i16> {
    let mut buf = raw;
    let mut samples = Vec::with_capacity(limit);
    while buf.remaining() >= 2 && samples.len() < limit {
        samples.push(buf.get_i16_le());
    }
    samples
}

fn duration_ms(duration: Duration) -> i32 {
    i32::try_from(duration.as_millis()).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::SimulatedSensor;
    use tracing_test::traced_test;

    fn test_config() -> SensorConfig {
        SensorConfig {
            startup_delay: Duration::ZERO,
            video_prepare_delay: Duration::ZERO,
            ..SensorConfig::default()
        }
    }

    fn open_sensor(sim: SimulatedSensor) -> Sensor {
        let mut sensor = Sensor::new(Box::new(sim), test_config());
        sensor.open().unwrap();
        sensor
    }

    #[test]
    fn test_read_info() {
        let mut sensor = open_sensor(SimulatedSensor::new(2, 512));
        let info = sensor.read_info().unwrap();
        assert_eq!(info.serial, "2422000001");
        assert_eq!(info.range_mm, 3.0);
    }

    #[test]
    #[traced_test]
    fn test_missing_parameter_reports_location_and_text() {
        let mut sim = SimulatedSensor::new(2, 512);
        sim.remove_parameter("SA_Range");
        let mut sensor = open_sensor(sim);

        let err = sensor.read_info().unwrap_err();
        match err {
            SweepError::Sensor {
                location,
                code,
                text,
            } => {
                assert_eq!(location, "GetParameterDouble (SA_Range)");
                assert_eq!(code, ErrCode::NOT_FOUND);
                assert!(text.contains("SA_Range"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(logs_contain("GetParameterDouble (SA_Range) returned error"));
    }

    #[test]
    fn test_open_twice_fails() {
        let mut sensor = open_sensor(SimulatedSensor::new(2, 512));
        let err = sensor.open().unwrap_err();
        assert!(matches!(err, SweepError::Sensor { ref location, .. } if location == "OpenSensorTCPIP"));
    }

    #[test]
    fn test_layout_without_video() {
        let mut sensor = open_sensor(SimulatedSensor::new(2, 512));
        let layout = sensor.transmitted_data_info().unwrap();

        assert_eq!(layout.values_per_frame, 2);
        assert_eq!(layout.channels.len(), 2);
        assert_eq!(layout.channels[0].scaled_unit.as_deref(), Some("mm"));
        assert!(!layout.has_video());
    }

    #[test]
    #[traced_test]
    fn test_optional_parameters_tolerated() {
        let mut sim = SimulatedSensor::new(2, 512);
        sim.remove_parameter("IA_Samplerate");
        sim.remove_parameter("IA_MaxOutputIndex");
        sim.remove_parameter("IA_Raw_Name1");
        let mut sensor = open_sensor(sim);

        let layout = sensor.transmitted_data_info().unwrap();
        assert_eq!(layout.sample_rate, None);
        assert_eq!(layout.max_output_index, None);
        assert_eq!(layout.channels[0].raw_name, None);
        assert_eq!(layout.data_rate, Some(1_000.0));
        assert!(logs_contain("Optional parameter not available"));
    }

    #[test]
    fn test_value_count_is_required() {
        let mut sim = SimulatedSensor::new(2, 512);
        sim.remove_parameter("IA_ValuesPerFrame");
        let mut sensor = open_sensor(sim);

        let err = sensor.transmitted_data_info().unwrap_err();
        assert!(err.to_string().starts_with("Get_TransmittedDataInfo returned error"));
    }

    #[tokio::test]
    async fn test_capture_without_video_is_none() {
        let mut sensor = open_sensor(SimulatedSensor::new(2, 512));
        assert_eq!(sensor.capture_video().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_capture_two_signals() {
        let mut sensor = open_sensor(SimulatedSensor::new(2, 512));
        sensor.set_video_output(true).unwrap();

        let layout = sensor.transmitted_data_info().unwrap();
        assert_eq!(layout.video_signals.len(), 2);
        assert_eq!(layout.video_signals[0].byte_len(), 1024);

        let frame = sensor.capture_video().await.unwrap().unwrap();
        assert_eq!(frame.signals.len(), VIDEO_CHANNELS);
        assert_eq!(frame.signals[0].name, "VideoRaw");
        assert_eq!(frame.signals[1].name, "VideoLightCorr");
        assert!(frame.signals.iter().all(|s| s.samples.len() == 512));
    }

    #[tokio::test]
    async fn test_capture_with_single_signal_fails() {
        let mut sensor = open_sensor(SimulatedSensor::new(1, 512));
        sensor.set_video_output(true).unwrap();

        let err = sensor.capture_video().await.unwrap_err();
        assert!(matches!(
            err,
            SweepError::MissingVideoSignals {
                expected: 2,
                found: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_capture_short_signal_fails() {
        // Sensor delivers 256 pixels, configuration expects 512
        let mut sensor = open_sensor(SimulatedSensor::new(2, 256));
        sensor.set_video_output(true).unwrap();

        let err = sensor.capture_video().await.unwrap_err();
        assert!(matches!(
            err,
            SweepError::ShortVideoSignal {
                expected: 512,
                actual: 256,
                ..
            }
        ));
    }

    #[test]
    fn test_named_parameter_access() {
        let mut sensor = open_sensor(SimulatedSensor::new(2, 512));
        sensor.set_parameter_double("SP_Exposure", 0.25).unwrap();
        sensor.set_parameter_string("SP_Name", "confocal").unwrap();

        assert_eq!(sensor.get_parameter_double("SP_Exposure").unwrap(), 0.25);
        assert_eq!(sensor.get_parameter_string("SP_Name").unwrap(), "confocal");
        assert!(sensor.get_parameter_int("SP_Name").is_err());
        assert!(sensor.execute("Not_A_Command").is_err());
    }

    #[test]
    fn test_decode_samples() {
        let raw = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80, 0x07];
        assert_eq!(decode_samples(&raw, 16), vec![1, -1, i16::MIN]);
        assert_eq!(decode_samples(&raw, 2), vec![1, -1]);
    }
}
