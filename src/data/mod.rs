//! Measurement output.

pub mod storage;

pub use storage::{frame_path, write_channels};
