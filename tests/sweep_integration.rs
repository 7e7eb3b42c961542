//! End-to-end sweeps against the simulated backends.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use sweep_daq::config::Settings;
use sweep_daq::detection::detect_devices;
use sweep_daq::hardware::simulated::{Journal, SimulatedDeviceManager, SimulatedSensor};
use sweep_daq::hardware::{connect_backends, Backends, ErrCode, SdkResult, SensorSdk};
use sweep_daq::{run_sweep, Angle, SweepError};
use tempfile::{tempdir, NamedTempFile};

/// Default settings without waits and with a fast stage.
fn fast_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.actuator.enable_settle = Duration::ZERO;
    settings.actuator.home_settle = Duration::ZERO;
    settings.actuator.move_settle = Duration::ZERO;
    settings.actuator.max_velocity = 1_000_000.0;
    settings.sensor.startup_delay = Duration::ZERO;
    settings.sensor.video_prepare_delay = Duration::ZERO;
    settings.sweep.step_delay = Duration::ZERO;
    settings.sweep.final_delay = Duration::ZERO;
    settings.output.directory = dir.to_path_buf();
    settings
}

/// Simulated sensor with injectable faults.
struct FaultySensor {
    inner: SimulatedSensor,
    /// 1-based `Get_VideoStreamSignal` call that fails
    fail_video_read: Option<usize>,
    fail_video_disable: bool,
    video_reads: usize,
}

impl FaultySensor {
    fn new(inner: SimulatedSensor) -> Self {
        Self {
            inner,
            fail_video_read: None,
            fail_video_disable: false,
            video_reads: 0,
        }
    }
}

impl SensorSdk for FaultySensor {
    fn open_tcpip(&mut self, address: &str) -> SdkResult<()> {
        self.inner.open_tcpip(address)
    }

    fn close(&mut self) -> SdkResult<()> {
        self.inner.close()
    }

    fn set_parameter_int(&mut self, name: &str, value: i32) -> SdkResult<()> {
        self.inner.set_parameter_int(name, value)
    }

    fn set_parameter_double(&mut self, name: &str, value: f64) -> SdkResult<()> {
        self.inner.set_parameter_double(name, value)
    }

    fn set_parameter_string(&mut self, name: &str, value: &str) -> SdkResult<()> {
        self.inner.set_parameter_string(name, value)
    }

    fn get_parameter_int(&mut self, name: &str) -> SdkResult<i32> {
        self.inner.get_parameter_int(name)
    }

    fn get_parameter_double(&mut self, name: &str) -> SdkResult<f64> {
        self.inner.get_parameter_double(name)
    }

    fn get_parameter_string(&mut self, name: &str) -> SdkResult<String> {
        self.inner.get_parameter_string(name)
    }

    fn get_parameter_binary(&mut self, name: &str, max_len: usize) -> SdkResult<Vec<u8>> {
        self.inner.get_parameter_binary(name, max_len)
    }

    fn exec_command(&mut self, command: &str) -> SdkResult<()> {
        if command == "Get_VideoStreamSignal" {
            self.video_reads += 1;
            if self.fail_video_read == Some(self.video_reads) {
                return Err(ErrCode::NO_SENSORDATA_AVAILABLE);
            }
        }
        self.inner.exec_command(command)
    }

    fn set_int_exec_command(&mut self, command: &str, name: &str, value: i32) -> SdkResult<()> {
        if self.fail_video_disable && name == "SP_OutputVideoRaw_Ch1_ETH" && value == 0 {
            return Err(ErrCode::NOT_OPEN);
        }
        self.inner.set_int_exec_command(command, name, value)
    }

    fn exec_command_get_int(&mut self, command: &str, name: &str) -> SdkResult<i32> {
        self.inner.exec_command_get_int(command, name)
    }

    fn last_error(&mut self) -> String {
        self.inner.last_error()
    }
}

fn tail(journal: &Journal, n: usize) -> Vec<String> {
    let entries = journal.entries();
    entries[entries.len().saturating_sub(n)..].to_vec()
}

#[tokio::test]
async fn test_default_sweep_writes_72_frames() {
    let dir = tempdir().unwrap();
    let settings = fast_settings(dir.path());

    let devices = SimulatedDeviceManager::new(vec!["27000001".into()]);
    let journal = devices.journal();
    let backends = Backends {
        devices: Box::new(devices),
        sensor: Box::new(SimulatedSensor::new(2, 512)),
    };

    let report = run_sweep(&settings, backends).await.unwrap();

    assert_eq!(report.files.len(), 72);
    assert!(report.skipped.is_empty());
    assert_eq!(report.files[0], dir.path().join("sweep_000.csv"));
    assert_eq!(report.files[1], dir.path().join("sweep_005.csv"));
    assert_eq!(report.files[71], dir.path().join("sweep_355.csv"));

    for path in &report.files {
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 512, "{}", path.display());
        assert!(lines
            .iter()
            .all(|l| l.split(',').count() == 2 && l.split(',').all(|v| v.parse::<i16>().is_ok())));
    }

    let entries = journal.entries();
    let head: Vec<&str> = entries.iter().take(10).map(String::as_str).collect();
    assert_eq!(
        head,
        vec![
            "build_device_list",
            "create_stage 27000001",
            "connect",
            "wait_for_settings_initialized",
            "load_configuration",
            "start_polling 250ms",
            "enable",
            "set_rotation_mode RotationalRange Quickest",
            "set_velocity 1000000 100",
            "home",
        ]
    );
    let tail: Vec<&str> = entries.iter().rev().take(4).rev().map(String::as_str).collect();
    assert_eq!(tail, vec!["home", "stop_polling", "disable", "disconnect"]);
    assert_eq!(journal.count("move_to"), 72);
    assert_eq!(journal.count("home"), 2);
}

#[tokio::test]
async fn test_sweep_without_video_skips_every_step() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.sweep.stop = 30.0;
    settings.simulation.video_signals = 0;

    let backends = connect_backends(&settings).unwrap();
    let report = run_sweep(&settings, backends).await.unwrap();

    assert!(report.files.is_empty());
    assert_eq!(report.skipped.len(), 7);
    assert_eq!(report.skipped[6], Angle::from_whole_degrees(30));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_optional_parameters_do_not_fail() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.sweep.stop = 10.0;

    let mut sensor = SimulatedSensor::new(2, 512);
    sensor.remove_parameter("IA_Samplerate");
    sensor.remove_parameter("IA_Datarate");
    sensor.remove_parameter("IA_MaxValuesPerFrame");
    sensor.remove_parameter("IA_Scaled_Unit2");

    let backends = Backends {
        devices: Box::new(SimulatedDeviceManager::new(vec!["27000001".into()])),
        sensor: Box::new(sensor),
    };
    let report = run_sweep(&settings, backends).await.unwrap();
    assert_eq!(report.files.len(), 3);
}

#[tokio::test]
async fn test_no_device_never_creates_controller() {
    let dir = tempdir().unwrap();
    let settings = fast_settings(dir.path());

    let devices = SimulatedDeviceManager::new(vec!["83000001".into()]);
    let journal = devices.journal();
    let backends = Backends {
        devices: Box::new(devices),
        sensor: Box::new(SimulatedSensor::new(2, 512)),
    };

    let err = run_sweep(&settings, backends).await.unwrap_err();
    assert!(matches!(err, SweepError::NoDeviceFound(27)));
    assert_eq!(journal.count("create_stage"), 0);
    assert_eq!(journal.count("connect"), 0);
}

#[tokio::test]
async fn test_failed_device_list_aborts() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.simulation.fail_device_list = true;

    let backends = connect_backends(&settings).unwrap();
    let err = run_sweep(&settings, backends).await.unwrap_err();
    assert!(matches!(err, SweepError::NoDeviceFound(_)));
}

#[tokio::test]
async fn test_sensor_error_carries_location() {
    let dir = tempdir().unwrap();
    let settings = fast_settings(dir.path());

    let mut sensor = SimulatedSensor::new(2, 512);
    sensor.remove_parameter("SA_SerialNumber");
    let backends = Backends {
        devices: Box::new(SimulatedDeviceManager::new(vec!["27000001".into()])),
        sensor: Box::new(sensor),
    };

    let err = run_sweep(&settings, backends).await.unwrap_err();
    match err {
        SweepError::Sensor { location, text, .. } => {
            assert_eq!(location, "GetParameterString (SA_SerialNumber)");
            assert!(text.contains("SA_SerialNumber"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_sensor_read_failure_skips_one_step() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.sweep.stop = 20.0;

    let devices = SimulatedDeviceManager::new(vec!["27000001".into()]);
    let journal = devices.journal();
    let mut sensor = FaultySensor::new(SimulatedSensor::new(2, 512));
    sensor.fail_video_read = Some(2);
    let backends = Backends {
        devices: Box::new(devices),
        sensor: Box::new(sensor),
    };

    let report = run_sweep(&settings, backends).await.unwrap();

    assert_eq!(report.failed, vec![Angle::from_whole_degrees(5)]);
    assert!(report.skipped.is_empty());
    assert_eq!(report.files.len(), 4);
    assert_eq!(report.files[1], dir.path().join("sweep_010.csv"));
    assert!(!dir.path().join("sweep_005.csv").exists());
    assert_eq!(journal.count("move_to"), 5);
    assert_eq!(tail(&journal, 4), vec!["home", "stop_polling", "disable", "disconnect"]);
}

#[tokio::test]
async fn test_sweep_leaves_sensor_closed_with_video_off() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.sweep.stop = 10.0;

    let sensor = SimulatedSensor::new(2, 512);
    let sensor_journal = sensor.journal();
    let backends = Backends {
        devices: Box::new(SimulatedDeviceManager::new(vec!["27000001".into()])),
        sensor: Box::new(sensor),
    };

    run_sweep(&settings, backends).await.unwrap();

    let entries = sensor_journal.entries();
    assert_eq!(entries.first().map(String::as_str), Some("sensor open 169.254.168.150"));
    assert_eq!(
        tail(&sensor_journal, 3),
        vec![
            "sensor Update_DataOutInterface SP_OutputEthernet=1",
            "sensor Update_Output_ETH SP_OutputVideoRaw_Ch1_ETH=0",
            "sensor close",
        ]
    );
    assert_eq!(sensor_journal.count("sensor close"), 1);
    assert_eq!(sensor_journal.count("sensor Get_VideoStreamSignal"), 3);
}

#[tokio::test]
async fn test_video_disable_failure_still_closes_sensor() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.sweep.stop = 5.0;

    let inner = SimulatedSensor::new(2, 512);
    let sensor_journal = inner.journal();
    let mut sensor = FaultySensor::new(inner);
    sensor.fail_video_disable = true;
    let backends = Backends {
        devices: Box::new(SimulatedDeviceManager::new(vec!["27000001".into()])),
        sensor: Box::new(sensor),
    };

    let report = run_sweep(&settings, backends).await.unwrap();

    assert_eq!(report.files.len(), 2);
    assert_eq!(sensor_journal.count("sensor Update_Output_ETH SP_OutputVideoRaw_Ch1_ETH=0"), 0);
    assert_eq!(
        sensor_journal.entries().last().map(String::as_str),
        Some("sensor close")
    );
}

#[tokio::test]
async fn test_move_timeout_ends_run() {
    let dir = tempdir().unwrap();
    let mut settings = fast_settings(dir.path());
    settings.actuator.max_velocity = 1.0;
    settings.actuator.move_timeout = Duration::from_secs(1);

    let backends = connect_backends(&settings).unwrap();
    let err = run_sweep(&settings, backends).await.unwrap_err();
    assert!(matches!(err, SweepError::Timeout { .. }));
}

#[tokio::test]
async fn test_sweep_from_config_file() {
    let dir = tempdir().unwrap();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[actuator]
enable_settle = "0s"
home_settle = "0s"
move_settle = "0s"
max_velocity = 100000.0

[sensor]
startup_delay = "0s"
video_prepare_delay = "0s"
video_samples = 128

[sweep]
start = 90.0
stop = 80.0
step = -2.5
step_delay = "0s"
final_delay = "0s"

[output]
directory = "{}"
prefix = "scan"

[simulation]
serials = ["27004242"]
"#,
        dir.path().display()
    )
    .unwrap();

    let settings = Settings::load_from(file.path()).unwrap();
    let backends = connect_backends(&settings).unwrap();
    let report = run_sweep(&settings, backends).await.unwrap();

    assert_eq!(report.files.len(), 5);
    assert_eq!(report.files[1], dir.path().join("scan_87.5.csv"));
    let content = std::fs::read_to_string(&report.files[4]).unwrap();
    assert_eq!(content.lines().count(), 128);
}

#[test]
fn test_detect_lists_simulated_controllers() {
    let mut settings = Settings::default();
    settings.simulation.serials = vec!["83000002".into(), "27000001".into(), "27000003".into()];

    let mut backends = connect_backends(&settings).unwrap();
    let serials = detect_devices(backends.devices.as_mut(), settings.actuator.device_type_id);
    assert_eq!(serials, vec!["27000001", "27000003"]);
}

#[test]
fn test_rendered_config_loads_back() {
    let mut settings = Settings::default();
    settings.sweep.step = 15.0;
    settings.output.prefix = "scan".into();
    settings.actuator.goto_move_timeout = Duration::from_secs(30);

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(settings.to_toml().unwrap().as_bytes()).unwrap();

    let loaded = Settings::load_from(file.path()).unwrap();
    assert_eq!(loaded.angles().unwrap().len(), 24);
    assert_eq!(loaded.output.prefix, "scan");
    assert_eq!(loaded.actuator.goto_move_timeout, Duration::from_secs(30));
    assert_eq!(loaded.sensor.address, settings.sensor.address);
}

#[test]
fn test_shipped_config_matches_defaults() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/sweep.toml");
    let settings = Settings::load_from(path).unwrap();
    let defaults = Settings::default();

    assert_eq!(settings.sensor.startup_delay, defaults.sensor.startup_delay);
    assert_eq!(settings.sensor.address, defaults.sensor.address);
    assert_eq!(settings.actuator.move_timeout, defaults.actuator.move_timeout);
    assert_eq!(settings.actuator.goto_move_timeout, defaults.actuator.goto_move_timeout);
    assert_eq!(settings.angles().unwrap(), defaults.angles().unwrap());
}
