//! Thorlabs Kinesis KCube DC Servo backend
//!
//! Binds the C API of `Thorlabs.MotionControl.KCube.DCServo`. Only built with
//! the `kinesis` feature; the library must be on the linker path.
//!
//! Protocol overview:
//! - Controllers are addressed by serial number (8 digit string)
//! - Positions, velocities and accelerations are device units; the library
//!   converts from real units using the stage's loaded settings
//! - Home and move return immediately; completion arrives as a message on the
//!   device's message queue (type 2 = generic motor, id 0 = homed, 1 = moved)

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, c_short, CString};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::angle::Angle;
use crate::error::{AppResult, SweepError};
use crate::hardware::{
    DeviceInfo, DeviceManager, RotationDirection, RotationMode, RotationStage,
};

const MESSAGE_TYPE_GENERIC_MOTOR: u16 = 2;
const MESSAGE_ID_HOMED: u16 = 0;
const MESSAGE_ID_MOVED: u16 = 1;

const UNIT_DISTANCE: c_int = 0;
const UNIT_VELOCITY: c_int = 1;
const UNIT_ACCELERATION: c_int = 2;

/// Interval between message queue checks
const MESSAGE_POLL: Duration = Duration::from_millis(50);

/// Buffer size for the comma separated serial list
const DEVICE_LIST_BUFFER: usize = 1024;

#[link(name = "Thorlabs.MotionControl.KCube.DCServo")]
extern "C" {
    fn TLI_BuildDeviceList() -> c_short;
    fn TLI_GetDeviceListByTypeExt(buffer: *mut c_char, size: u32, type_id: c_int) -> c_short;

    fn CC_Open(serial: *const c_char) -> c_short;
    fn CC_Close(serial: *const c_char);
    fn CC_RequestSettings(serial: *const c_char) -> c_short;
    fn CC_LoadSettings(serial: *const c_char) -> bool;
    fn CC_StartPolling(serial: *const c_char, milliseconds: c_int) -> bool;
    fn CC_StopPolling(serial: *const c_char);
    fn CC_EnableChannel(serial: *const c_char) -> c_short;
    fn CC_DisableChannel(serial: *const c_char) -> c_short;
    fn CC_SetRotationModes(serial: *const c_char, mode: c_int, direction: c_int) -> c_short;
    fn CC_SetVelParams(serial: *const c_char, acceleration: c_int, max_velocity: c_int) -> c_short;
    fn CC_Home(serial: *const c_char) -> c_short;
    fn CC_MoveToPosition(serial: *const c_char, index: c_int) -> c_short;
    fn CC_GetPosition(serial: *const c_char) -> c_int;
    fn CC_ClearMessageQueue(serial: *const c_char);
    fn CC_GetNextMessage(
        serial: *const c_char,
        message_type: *mut u16,
        message_id: *mut u16,
        message_data: *mut u32,
    ) -> bool;
    fn CC_GetDeviceUnitFromRealValue(
        serial: *const c_char,
        real_value: f64,
        device_value: *mut c_int,
        unit_type: c_int,
    ) -> c_short;
    fn CC_GetRealValueFromDeviceUnit(
        serial: *const c_char,
        device_value: c_int,
        real_value: *mut f64,
        unit_type: c_int,
    ) -> c_short;
}

fn check(call: &str, serial: &str, code: c_short) -> AppResult<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(SweepError::Actuator(format!(
            "{} failed for {} with code {}",
            call, serial, code
        )))
    }
}

/// Device registry backed by the Kinesis library.
#[derive(Debug, Default)]
pub struct KinesisDeviceManager;

impl KinesisDeviceManager {
    /// Registry handle. The library keeps the list globally.
    pub fn new() -> Self {
        Self
    }
}

impl DeviceManager for KinesisDeviceManager {
    fn build_device_list(&mut self) -> AppResult<()> {
        let code = unsafe { TLI_BuildDeviceList() };
        if code != 0 {
            return Err(SweepError::DeviceList(format!(
                "TLI_BuildDeviceList returned {}",
                code
            )));
        }
        Ok(())
    }

    fn device_list(&self, type_id: u32) -> Vec<String> {
        let Ok(type_id) = c_int::try_from(type_id) else {
            return Vec::new();
        };
        let mut buffer = vec![0u8; DEVICE_LIST_BUFFER];
        let code = unsafe {
            TLI_GetDeviceListByTypeExt(
                buffer.as_mut_ptr().cast::<c_char>(),
                DEVICE_LIST_BUFFER as u32,
                type_id,
            )
        };
        if code != 0 {
            debug!(code, "TLI_GetDeviceListByTypeExt failed");
            return Vec::new();
        }
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
        String::from_utf8_lossy(&buffer[..end])
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn create_stage(&mut self, serial: &str) -> AppResult<Box<dyn RotationStage>> {
        Ok(Box::new(KinesisStage::new(serial)?))
    }
}

/// One KCube DC Servo controller.
pub struct KinesisStage {
    serial: String,
    c_serial: CString,
    open: bool,
    polling: bool,
}

impl KinesisStage {
    /// Handle for `serial`. Does not open the device.
    pub fn new(serial: &str) -> AppResult<Self> {
        let c_serial = CString::new(serial)
            .map_err(|_| SweepError::Actuator(format!("invalid serial number '{}'", serial)))?;
        Ok(Self {
            serial: serial.to_string(),
            c_serial,
            open: false,
            polling: false,
        })
    }

    fn to_device_units(&self, value: f64, unit_type: c_int) -> AppResult<c_int> {
        let mut device_value: c_int = 0;
        let code = unsafe {
            CC_GetDeviceUnitFromRealValue(
                self.c_serial.as_ptr(),
                value,
                &mut device_value,
                unit_type,
            )
        };
        check("CC_GetDeviceUnitFromRealValue", &self.serial, code)?;
        Ok(device_value)
    }

    /// Poll the message queue until `(type, id)` arrives or `timeout` passes.
    async fn wait_for_message(
        &self,
        operation: &str,
        message_id: u16,
        timeout: Duration,
    ) -> AppResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut message_type: u16 = 0;
            let mut id: u16 = 0;
            let mut data: u32 = 0;
            let received = unsafe {
                CC_GetNextMessage(self.c_serial.as_ptr(), &mut message_type, &mut id, &mut data)
            };
            if received {
                if message_type == MESSAGE_TYPE_GENERIC_MOTOR && id == message_id {
                    return Ok(());
                }
                continue;
            }
            if Instant::now() >= deadline {
                return Err(SweepError::Timeout {
                    operation: format!("{} on {}", operation, self.serial),
                    timeout,
                });
            }
            sleep(MESSAGE_POLL).await;
        }
    }
}

#[async_trait]
impl RotationStage for KinesisStage {
    async fn connect(&mut self) -> AppResult<()> {
        let code = unsafe { CC_Open(self.c_serial.as_ptr()) };
        check("CC_Open", &self.serial, code)?;
        self.open = true;
        info!(serial = %self.serial, "Controller opened");
        Ok(())
    }

    async fn wait_for_settings_initialized(&mut self, timeout: Duration) -> AppResult<()> {
        let deadline = Instant::now() + timeout;
        while unsafe { CC_RequestSettings(self.c_serial.as_ptr()) } != 0 {
            if Instant::now() >= deadline {
                return Err(SweepError::Timeout {
                    operation: format!("settings initialization on {}", self.serial),
                    timeout,
                });
            }
            sleep(MESSAGE_POLL).await;
        }
        Ok(())
    }

    async fn load_configuration(&mut self) -> AppResult<()> {
        if unsafe { CC_LoadSettings(self.c_serial.as_ptr()) } {
            Ok(())
        } else {
            Err(SweepError::Actuator(format!(
                "CC_LoadSettings failed for {}",
                self.serial
            )))
        }
    }

    async fn start_polling(&mut self, interval: Duration) -> AppResult<()> {
        let ms = c_int::try_from(interval.as_millis()).unwrap_or(c_int::MAX);
        if !unsafe { CC_StartPolling(self.c_serial.as_ptr(), ms) } {
            return Err(SweepError::Actuator(format!(
                "CC_StartPolling failed for {}",
                self.serial
            )));
        }
        self.polling = true;
        Ok(())
    }

    async fn enable(&mut self) -> AppResult<()> {
        let code = unsafe { CC_EnableChannel(self.c_serial.as_ptr()) };
        check("CC_EnableChannel", &self.serial, code)
    }

    async fn set_rotation_mode(
        &mut self,
        mode: RotationMode,
        direction: RotationDirection,
    ) -> AppResult<()> {
        let mode = match mode {
            RotationMode::LinearRange => 0,
            RotationMode::RotationalUnlimited => 1,
            RotationMode::RotationalRange => 2,
        };
        let direction = match direction {
            RotationDirection::Quickest => 0,
            RotationDirection::Forwards => 1,
            RotationDirection::Backwards => 2,
        };
        let code = unsafe { CC_SetRotationModes(self.c_serial.as_ptr(), mode, direction) };
        check("CC_SetRotationModes", &self.serial, code)
    }

    async fn set_velocity(&mut self, max_velocity: f64, acceleration: f64) -> AppResult<()> {
        let velocity = self.to_device_units(max_velocity, UNIT_VELOCITY)?;
        let acceleration = self.to_device_units(acceleration, UNIT_ACCELERATION)?;
        let code = unsafe { CC_SetVelParams(self.c_serial.as_ptr(), acceleration, velocity) };
        check("CC_SetVelParams", &self.serial, code)
    }

    async fn home(&mut self, timeout: Duration) -> AppResult<()> {
        unsafe { CC_ClearMessageQueue(self.c_serial.as_ptr()) };
        let code = unsafe { CC_Home(self.c_serial.as_ptr()) };
        check("CC_Home", &self.serial, code)?;
        self.wait_for_message("home", MESSAGE_ID_HOMED, timeout).await
    }

    async fn move_to(&mut self, angle: Angle, timeout: Duration) -> AppResult<()> {
        let target = self.to_device_units(angle.degrees(), UNIT_DISTANCE)?;
        unsafe { CC_ClearMessageQueue(self.c_serial.as_ptr()) };
        let code = unsafe { CC_MoveToPosition(self.c_serial.as_ptr(), target) };
        check("CC_MoveToPosition", &self.serial, code)?;
        self.wait_for_message(&format!("move to {} deg", angle), MESSAGE_ID_MOVED, timeout)
            .await
    }

    async fn position(&mut self) -> AppResult<Angle> {
        let device_value = unsafe { CC_GetPosition(self.c_serial.as_ptr()) };
        let mut degrees = 0.0;
        let code = unsafe {
            CC_GetRealValueFromDeviceUnit(
                self.c_serial.as_ptr(),
                device_value,
                &mut degrees,
                UNIT_DISTANCE,
            )
        };
        check("CC_GetRealValueFromDeviceUnit", &self.serial, code)?;
        Ok(Angle::from_degrees(degrees))
    }

    async fn stop_polling(&mut self) -> AppResult<()> {
        unsafe { CC_StopPolling(self.c_serial.as_ptr()) };
        self.polling = false;
        Ok(())
    }

    async fn disable(&mut self) -> AppResult<()> {
        let code = unsafe { CC_DisableChannel(self.c_serial.as_ptr()) };
        check("CC_DisableChannel", &self.serial, code)
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        if self.open {
            unsafe { CC_Close(self.c_serial.as_ptr()) };
            self.open = false;
        }
        Ok(())
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            serial: self.serial.clone(),
            name: "KCube DC Servo".to_string(),
        }
    }
}

impl Drop for KinesisStage {
    fn drop(&mut self) {
        if self.polling {
            unsafe { CC_StopPolling(self.c_serial.as_ptr()) };
        }
        if self.open {
            unsafe { CC_Close(self.c_serial.as_ptr()) };
        }
    }
}
