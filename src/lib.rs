//! Core library for the `sweep_daq` acquisition program.
//!
//! Drives a motorized rotation stage through an angular sweep and, at every
//! step, captures a video frame from a confocal displacement sensor and
//! stores it as a small CSV file.
//!
//! # Modules
//!
//! - [`angle`] - fixed-point angles and the linear angle range
//! - [`config`] - layered settings (defaults, TOML, `SWEEP_` environment)
//! - [`hardware`] - vendor SDK seams and their simulated and FFI backends
//! - [`detection`] - controller enumeration
//! - [`actuator`] / [`sensor`] - device facades
//! - [`data`] - CSV output
//! - [`sweep`] - the acquisition sequence and interactive positioning

pub mod actuator;
pub mod angle;
pub mod config;
pub mod data;
pub mod detection;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod sensor;
pub mod sweep;

pub use angle::{linear_range, Angle};
pub use config::Settings;
pub use error::{AppResult, SweepError};
pub use sweep::{run_goto, run_sweep, SweepReport};
