//! Micro-Epsilon MEDAQLib backend
//!
//! One [`MedaqSensor`] owns one MEDAQLib sensor instance, created by model
//! name and released on drop. Only built with the `medaqlib` feature.

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, CStr, CString};

use tracing::debug;

use crate::error::{AppResult, SweepError};
use crate::hardware::{ErrCode, SdkResult, SensorSdk};

/// Capacity for string parameters and error texts
const TEXT_BUFFER: usize = 1024;

#[link(name = "MEDAQLib")]
extern "system" {
    fn CreateSensorInstByName(sensor_name: *const c_char) -> u32;
    fn ReleaseSensorInstance(instance: u32) -> c_int;

    fn SetParameterInt(instance: u32, name: *const c_char, value: c_int) -> c_int;
    fn SetParameterDouble(instance: u32, name: *const c_char, value: f64) -> c_int;
    fn SetParameterString(instance: u32, name: *const c_char, value: *const c_char) -> c_int;
    fn GetParameterInt(instance: u32, name: *const c_char, value: *mut c_int) -> c_int;
    fn GetParameterDouble(instance: u32, name: *const c_char, value: *mut f64) -> c_int;
    fn GetParameterString(
        instance: u32,
        name: *const c_char,
        value: *mut c_char,
        max_len: *mut u32,
    ) -> c_int;
    fn GetParameterBinary(instance: u32, name: *const c_char, value: *mut u8, max_len: *mut u32)
        -> c_int;

    fn OpenSensorTCPIP(instance: u32, remote_address: *const c_char) -> c_int;
    fn CloseSensor(instance: u32) -> c_int;

    fn ExecSCmd(instance: u32, command: *const c_char) -> c_int;
    fn SetIntExecSCmd(instance: u32, command: *const c_char, name: *const c_char, value: c_int)
        -> c_int;
    fn ExecSCmdGetInt(
        instance: u32,
        command: *const c_char,
        name: *const c_char,
        value: *mut c_int,
    ) -> c_int;

    fn GetError(instance: u32, text: *mut c_char, max_len: u32) -> c_int;
}

fn status(code: c_int) -> SdkResult<()> {
    let code = ErrCode(code);
    if code.is_ok() {
        Ok(())
    } else {
        Err(code)
    }
}

fn c_string(value: &str) -> SdkResult<CString> {
    CString::new(value).map_err(|_| ErrCode::WRONG_PARAMETER)
}

/// One MEDAQLib sensor instance.
pub struct MedaqSensor {
    instance: u32,
}

impl MedaqSensor {
    /// Create an instance for the given sensor model (e.g. `IFC2422`).
    ///
    /// # Errors
    /// Returns `SweepError::Sensor` if the library does not know the model.
    pub fn create(model: &str) -> AppResult<Self> {
        let name = CString::new(model)
            .map_err(|_| SweepError::Configuration(format!("invalid sensor model '{}'", model)))?;
        let instance = unsafe { CreateSensorInstByName(name.as_ptr()) };
        if instance == 0 {
            return Err(SweepError::Sensor {
                location: "CreateSensorInstByName".into(),
                code: ErrCode::CANNOT_OPEN,
                text: format!("cannot create driver instance for '{}'", model),
            });
        }
        debug!(instance, model, "Sensor instance created");
        Ok(Self { instance })
    }
}

impl SensorSdk for MedaqSensor {
    fn open_tcpip(&mut self, address: &str) -> SdkResult<()> {
        let address = c_string(address)?;
        status(unsafe { OpenSensorTCPIP(self.instance, address.as_ptr()) })
    }

    fn close(&mut self) -> SdkResult<()> {
        status(unsafe { CloseSensor(self.instance) })
    }

    fn set_parameter_int(&mut self, name: &str, value: i32) -> SdkResult<()> {
        let name = c_string(name)?;
        status(unsafe { SetParameterInt(self.instance, name.as_ptr(), value) })
    }

    fn set_parameter_double(&mut self, name: &str, value: f64) -> SdkResult<()> {
        let name = c_string(name)?;
        status(unsafe { SetParameterDouble(self.instance, name.as_ptr(), value) })
    }

    fn set_parameter_string(&mut self, name: &str, value: &str) -> SdkResult<()> {
        let name = c_string(name)?;
        let value = c_string(value)?;
        status(unsafe { SetParameterString(self.instance, name.as_ptr(), value.as_ptr()) })
    }

    fn get_parameter_int(&mut self, name: &str) -> SdkResult<i32> {
        let name = c_string(name)?;
        let mut value: c_int = 0;
        status(unsafe { GetParameterInt(self.instance, name.as_ptr(), &mut value) })?;
        Ok(value)
    }

    fn get_parameter_double(&mut self, name: &str) -> SdkResult<f64> {
        let name = c_string(name)?;
        let mut value = 0.0;
        status(unsafe { GetParameterDouble(self.instance, name.as_ptr(), &mut value) })?;
        Ok(value)
    }

    fn get_parameter_string(&mut self, name: &str) -> SdkResult<String> {
        let name = c_string(name)?;
        let mut buffer = vec![0 as c_char; TEXT_BUFFER];
        let mut len = TEXT_BUFFER as u32;
        status(unsafe {
            GetParameterString(self.instance, name.as_ptr(), buffer.as_mut_ptr(), &mut len)
        })?;
        let text = unsafe { CStr::from_ptr(buffer.as_ptr()) };
        Ok(text.to_string_lossy().into_owned())
    }

    fn get_parameter_binary(&mut self, name: &str, max_len: usize) -> SdkResult<Vec<u8>> {
        let name = c_string(name)?;
        let mut buffer = vec![0u8; max_len];
        let mut len = u32::try_from(max_len).map_err(|_| ErrCode::WRONG_PARAMETER)?;
        status(unsafe {
            GetParameterBinary(self.instance, name.as_ptr(), buffer.as_mut_ptr(), &mut len)
        })?;
        buffer.truncate((len as usize).min(max_len));
        Ok(buffer)
    }

    fn exec_command(&mut self, command: &str) -> SdkResult<()> {
        let command = c_string(command)?;
        status(unsafe { ExecSCmd(self.instance, command.as_ptr()) })
    }

    fn set_int_exec_command(&mut self, command: &str, name: &str, value: i32) -> SdkResult<()> {
        let command = c_string(command)?;
        let name = c_string(name)?;
        status(unsafe { SetIntExecSCmd(self.instance, command.as_ptr(), name.as_ptr(), value) })
    }

    fn exec_command_get_int(&mut self, command: &str, name: &str) -> SdkResult<i32> {
        let command = c_string(command)?;
        let name = c_string(name)?;
        let mut value: c_int = 0;
        status(unsafe {
            ExecSCmdGetInt(self.instance, command.as_ptr(), name.as_ptr(), &mut value)
        })?;
        Ok(value)
    }

    fn last_error(&mut self) -> String {
        let mut buffer = vec![0 as c_char; TEXT_BUFFER];
        unsafe {
            GetError(self.instance, buffer.as_mut_ptr(), TEXT_BUFFER as u32);
            CStr::from_ptr(buffer.as_ptr()).to_string_lossy().into_owned()
        }
    }
}

impl Drop for MedaqSensor {
    fn drop(&mut self) {
        unsafe {
            ReleaseSensorInstance(self.instance);
        }
    }
}
