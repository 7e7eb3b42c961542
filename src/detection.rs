//! Controller detection.

use tracing::{error, info, warn};

use crate::error::{AppResult, SweepError};
use crate::hardware::DeviceManager;

/// Build the device list and return the serials of the given controller type.
///
/// A failing enumeration is logged and yields an empty list.
pub fn detect_devices(manager: &mut dyn DeviceManager, type_id: u32) -> Vec<String> {
    if let Err(e) = manager.build_device_list() {
        error!(error = %e, "Device list failed to build!");
        return Vec::new();
    }

    let serials = manager.device_list(type_id);
    match serials.first() {
        Some(serial) => info!(type_id, count = serials.len(), "Device detected: {}", serial),
        None => warn!(type_id, "No connected devices, please connect one."),
    }
    serials
}

/// The first detected serial, or `NoDeviceFound`.
pub fn first_device(serials: &[String], type_id: u32) -> AppResult<&str> {
    serials
        .first()
        .map(String::as_str)
        .ok_or(SweepError::NoDeviceFound(type_id))
}
