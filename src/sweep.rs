//! Sweep orchestration.
//!
//! Runs the whole acquisition in sequence on the calling task:
//!
//! 1. detect the controller and bring the actuator up
//! 2. open the sensor, read its identification and enable video output
//! 3. home, then visit every angle: move, query layout, capture, write CSV
//! 4. home again and tear both devices down
//!
//! A sensor failure during a step is logged, the angle is recorded as failed
//! and the sweep moves on. Any other error aborts the run where it happens;
//! devices are not torn down on that path.

use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::angle::Angle;
use crate::config::Settings;
use crate::data::{frame_path, write_channels};
use crate::detection::{detect_devices, first_device};
use crate::error::{AppResult, SweepError};
use crate::hardware::{Backends, DeviceManager};
use crate::sensor::{Sensor, VideoFrame, VIDEO_CHANNELS};

const PROMPT: &str = "Please enter angle value (deg): ";

/// Outcome of a completed sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Files written, in acquisition order
    pub files: Vec<PathBuf>,
    /// Angles visited without video signals
    pub skipped: Vec<Angle>,
    /// Angles whose sensor query or capture failed
    pub failed: Vec<Angle>,
}

/// Result of one sweep step.
enum Step {
    Saved(PathBuf),
    NoVideo,
}

/// Detect the controller, create it and bring it to the configured state.
///
/// No controller is created when detection finds nothing.
async fn prepare_actuator(
    settings: &Settings,
    devices: &mut dyn DeviceManager,
) -> AppResult<Actuator> {
    let type_id = settings.actuator.device_type_id;
    let serials = detect_devices(devices, type_id);
    let serial = first_device(&serials, type_id)?;

    let stage = devices.create_stage(serial)?;
    let mut actuator = Actuator::new(stage, settings.actuator.clone());
    actuator.initialize().await?;
    actuator.enable().await?;
    actuator.configure().await?;
    actuator.show_info();
    Ok(actuator)
}

/// Sensor-side failures that cost one step, not the run.
fn is_step_failure(error: &SweepError) -> bool {
    matches!(
        error,
        SweepError::Sensor { .. }
            | SweepError::MissingVideoSignals { .. }
            | SweepError::ShortVideoSignal { .. }
    )
}

/// Query the layout, capture and store one frame at the current angle.
async fn acquire(sensor: &mut Sensor, path: PathBuf) -> AppResult<Step> {
    let layout = sensor.transmitted_data_info()?;
    debug!(values = layout.values_per_frame, video = layout.video_signals.len(), "Frame layout");

    match sensor.capture_video().await? {
        Some(frame) => {
            let (first, second) = channels(&frame)?;
            write_channels(&path, first, second)?;
            Ok(Step::Saved(path))
        }
        None => Ok(Step::NoVideo),
    }
}

fn channels(frame: &VideoFrame) -> AppResult<(&[i16], &[i16])> {
    match frame.signals.as_slice() {
        [first, second, ..] => Ok((first.samples.as_slice(), second.samples.as_slice())),
        signals => Err(SweepError::MissingVideoSignals {
            expected: VIDEO_CHANNELS,
            found: signals.len(),
        }),
    }
}

/// Run the full acquisition sweep.
///
/// # Errors
/// Fails on device, file and setup errors. Sensor errors inside a step only
/// mark that angle as failed. No device found means no controller is ever
/// created.
pub async fn run_sweep(settings: &Settings, backends: Backends) -> AppResult<SweepReport> {
    let Backends {
        mut devices,
        sensor,
    } = backends;
    let angles = settings.angles()?;

    let mut actuator = prepare_actuator(settings, devices.as_mut()).await?;

    sleep(settings.sensor.startup_delay).await;
    let mut sensor = Sensor::new(sensor, settings.sensor.clone());
    sensor.open()?;
    let sensor_info = sensor.read_info()?;
    sensor.set_video_output(true)?;
    sensor.transmitted_data_info()?;

    actuator.home().await?;

    info!(
        steps = angles.len(),
        repetitions = settings.sweep.repetitions,
        sensor = %sensor_info.serial,
        "Starting sweep"
    );

    let output = &settings.output;
    let mut report = SweepReport::default();
    for repetition in 1..=settings.sweep.repetitions {
        let tag = (settings.sweep.repetitions > 1).then_some(repetition);

        for &angle in &angles {
            actuator.move_to(angle).await?;

            let path = frame_path(
                &output.directory,
                &output.prefix,
                angle,
                output.angle_width,
                tag,
            );
            match acquire(&mut sensor, path).await {
                Ok(Step::Saved(path)) => {
                    info!("Saved {} at {} deg", path.display(), angle);
                    report.files.push(path);
                }
                Ok(Step::NoVideo) => {
                    warn!(%angle, "Sensor has no video signals, step skipped");
                    report.skipped.push(angle);
                }
                Err(e) if is_step_failure(&e) => {
                    warn!(%angle, error = %e, "Sensor read failed, step skipped");
                    report.failed.push(angle);
                }
                Err(e) => return Err(e),
            }

            sleep(settings.sweep.step_delay).await;
        }
    }

    actuator.home().await?;
    sleep(settings.sweep.final_delay).await;
    actuator.shutdown().await?;

    if let Err(e) = sensor.set_video_output(false) {
        warn!(error = %e, "Could not disable video output");
    }
    sensor.close()?;

    info!(
        files = report.files.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Sweep finished"
    );
    Ok(report)
}

/// Interactive positioning: read angles from `input` and move to each.
///
/// Stops on `quit`, `exit` or end of input, then homes and shuts the actuator
/// down. Unparsable lines print `Invalid input!` and are skipped.
pub async fn run_goto<R, W>(
    settings: &Settings,
    devices: &mut dyn DeviceManager,
    input: R,
    mut output: W,
) -> AppResult<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut actuator = prepare_actuator(settings, devices).await?;
    actuator.home().await?;

    let mut lines = input.lines();
    loop {
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line == "quit" || line == "exit" {
            break;
        }

        match line.parse::<Angle>() {
            Ok(angle) => {
                actuator
                    .move_within(angle, settings.actuator.goto_move_timeout)
                    .await?;
                let position = actuator.position().await?;
                output
                    .write_all(format!("Position: {} deg\n", position).as_bytes())
                    .await?;
            }
            Err(_) => output.write_all(b"Invalid input!\n").await?,
        }
    }

    actuator.home().await?;
    sleep(settings.sweep.final_delay).await;
    actuator.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::without_settling;
    use crate::hardware::simulated::{SimulatedDeviceManager, SimulatedSensor};
    use std::time::Duration;
    use tempfile::tempdir;

    fn fast_settings(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.actuator = without_settling(settings.actuator);
        settings.actuator.max_velocity = 100_000.0;
        settings.sensor.startup_delay = Duration::ZERO;
        settings.sensor.video_prepare_delay = Duration::ZERO;
        settings.sweep.step_delay = Duration::ZERO;
        settings.sweep.final_delay = Duration::ZERO;
        settings.output.directory = dir.to_path_buf();
        settings
    }

    #[tokio::test]
    async fn test_sweep_writes_file_per_angle() {
        let dir = tempdir().unwrap();
        let mut settings = fast_settings(dir.path());
        settings.sweep.stop = 20.0;

        let backends = Backends {
            devices: Box::new(SimulatedDeviceManager::new(vec!["27000001".into()])),
            sensor: Box::new(SimulatedSensor::new(2, 512)),
        };
        let report = run_sweep(&settings, backends).await.unwrap();

        assert_eq!(report.files.len(), 5);
        assert!(report.skipped.is_empty());
        assert_eq!(report.files[1], dir.path().join("sweep_005.csv"));
    }

    #[tokio::test]
    async fn test_repetitions_tag_file_names() {
        let dir = tempdir().unwrap();
        let mut settings = fast_settings(dir.path());
        settings.sweep.stop = 5.0;
        settings.sweep.repetitions = 2;

        let backends = Backends {
            devices: Box::new(SimulatedDeviceManager::new(vec!["27000001".into()])),
            sensor: Box::new(SimulatedSensor::new(2, 512)),
        };
        let report = run_sweep(&settings, backends).await.unwrap();

        assert_eq!(report.files.len(), 4);
        assert_eq!(report.files[0], dir.path().join("sweep_r1_000.csv"));
        assert_eq!(report.files[3], dir.path().join("sweep_r2_005.csv"));
    }

    #[tokio::test]
    async fn test_goto_loop() {
        let settings = fast_settings(std::path::Path::new("unused"));
        let mut devices = SimulatedDeviceManager::new(vec!["27000001".into()]);
        let journal = devices.journal();

        let input: &[u8] = b"45\nnonsense\n370\nquit\n90\n";
        let mut output = Vec::new();
        run_goto(&settings, &mut devices, input, &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with(PROMPT));
        assert!(text.contains("Position: 45 deg"));
        assert!(text.contains("Invalid input!"));
        assert!(text.contains("Position: 10 deg"));
        assert_eq!(journal.count("move_to"), 2);
        assert_eq!(journal.entries().last().map(String::as_str), Some("disconnect"));
    }

    #[tokio::test]
    async fn test_goto_quit_is_exact() {
        let settings = fast_settings(std::path::Path::new("unused"));
        let mut devices = SimulatedDeviceManager::new(vec!["27000001".into()]);
        let journal = devices.journal();

        let input: &[u8] = b"QUIT\nExit\n30\n";
        let mut output = Vec::new();
        run_goto(&settings, &mut devices, input, &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.matches("Invalid input!").count(), 2);
        assert!(text.contains("Position: 30 deg"));
        assert_eq!(journal.count("move_to"), 1);
    }

    #[tokio::test]
    async fn test_goto_uses_its_own_move_timeout() {
        let mut settings = fast_settings(std::path::Path::new("unused"));
        settings.actuator.max_velocity = 1.0;
        settings.actuator.move_timeout = Duration::from_secs(100);
        settings.actuator.goto_move_timeout = Duration::from_secs(1);
        let mut devices = SimulatedDeviceManager::new(vec!["27000001".into()]);

        // 45° at 1 deg/s exceeds the goto limit but not the sweep limit
        let input: &[u8] = b"45\n";
        let err = run_goto(&settings, &mut devices, input, tokio::io::sink())
            .await
            .unwrap_err();
        match err {
            SweepError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_secs(1)),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_goto_end_of_input() {
        let settings = fast_settings(std::path::Path::new("unused"));
        let mut devices = SimulatedDeviceManager::new(vec!["27000001".into()]);
        let journal = devices.journal();

        let input: &[u8] = b"";
        run_goto(&settings, &mut devices, input, tokio::io::sink())
            .await
            .unwrap();
        assert_eq!(journal.count("home"), 2);
    }
}
