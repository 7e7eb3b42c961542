//! CSV output for captured video frames.
//!
//! One file per sweep step: one line per sample, the two channels separated by
//! a comma, no header.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::angle::Angle;
use crate::error::{AppResult, SweepError};

/// Write two parallel channels as `a,b` lines.
///
/// Creates the parent directory if needed and overwrites an existing file.
///
/// # Errors
/// - `ChannelLengthMismatch` if the channels differ in length
/// - I/O or CSV errors while writing
pub fn write_channels(path: &Path, first: &[i16], second: &[i16]) -> AppResult<()> {
    if first.len() != second.len() {
        return Err(SweepError::ChannelLengthMismatch {
            left: first.len(),
            right: second.len(),
        });
    }

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    for (a, b) in first.iter().zip(second) {
        writer.serialize((a, b))?;
    }
    writer.flush()?;

    debug!(path = %path.display(), lines = first.len(), "CSV written");
    Ok(())
}

/// File path for one sweep step: `<dir>/<prefix>_<angle>.csv`.
///
/// The angle is zero padded to `width` digits. With a repetition number the
/// name becomes `<prefix>_r<n>_<angle>.csv`.
pub fn frame_path(
    dir: &Path,
    prefix: &str,
    angle: Angle,
    width: usize,
    repetition: Option<u32>,
) -> PathBuf {
    let name = match repetition {
        Some(n) => format!("{}_r{}_{}.csv", prefix, n, angle.padded(width)),
        None => format!("{}_{}.csv", prefix, angle.padded(width)),
    };
    dir.join(name)
}
