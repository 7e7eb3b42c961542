//! Fixed-point angles and the sweep angle generator.
//!
//! Angles are held as integer millidegrees so that a sweep visits exactly
//! `start + i * step` with no floating point drift, and so that file names
//! derived from an angle are stable.

use std::fmt;
use std::str::FromStr;

use crate::error::{AppResult, SweepError};

const MILLI_PER_DEGREE: i64 = 1000;
const FRACTION_DIGITS: usize = 3;

/// Largest angle set [`linear_range`] will produce.
pub const MAX_RANGE_LEN: i64 = 1_000_000;

/// A rotation angle in degrees with millidegree resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Angle(i64);

impl Angle {
    /// 0 degrees
    pub const ZERO: Angle = Angle(0);

    /// Build from an integer number of millidegrees.
    pub const fn from_millidegrees(millidegrees: i64) -> Self {
        Self(millidegrees)
    }

    /// Build from whole degrees.
    pub const fn from_whole_degrees(degrees: i64) -> Self {
        Self(degrees * MILLI_PER_DEGREE)
    }

    /// Build from floating point degrees, rounded to the nearest millidegree.
    pub fn from_degrees(degrees: f64) -> Self {
        Self((degrees * MILLI_PER_DEGREE as f64).round() as i64)
    }

    /// Raw millidegree value.
    pub const fn millidegrees(self) -> i64 {
        self.0
    }

    /// Value in degrees, for the vendor APIs that take floating point.
    pub fn degrees(self) -> f64 {
        self.0 as f64 / MILLI_PER_DEGREE as f64
    }

    /// Decimal text left-padded with `'0'` to `width` characters.
    ///
    /// `5` becomes `"005"` for a width of 3; text already at least `width`
    /// long is returned unchanged.
    pub fn padded(self, width: usize) -> String {
        format!("{:0>width$}", self.to_string(), width = width)
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / MILLI_PER_DEGREE as u64;
        let frac = abs % MILLI_PER_DEGREE as u64;
        if frac == 0 {
            write!(f, "{}{}", sign, whole)
        } else {
            let digits = format!("{:0width$}", frac, width = FRACTION_DIGITS);
            write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Angle {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SweepError::InvalidAngle(s.to_string());
        let text = s.trim();

        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit())
            || !frac.bytes().all(|b| b.is_ascii_digit())
            || frac.len() > FRACTION_DIGITS
        {
            return Err(invalid());
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac: i64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac, width = FRACTION_DIGITS)
                .parse()
                .map_err(|_| invalid())?
        };

        let value = whole
            .checked_mul(MILLI_PER_DEGREE)
            .and_then(|v| v.checked_add(frac))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -value } else { value }))
    }
}

/// Generate the ordered angle set `start, start + step, ...` up to `stop`.
///
/// The element count is `floor((stop - start) / step) + 1`. `step` may be
/// negative for a descending sweep but must point from `start` towards `stop`.
///
/// # Errors
/// - `step` is zero
/// - `step` points away from `stop`
/// - the span overflows or the set would exceed [`MAX_RANGE_LEN`] angles
pub fn linear_range(start: Angle, stop: Angle, step: Angle) -> AppResult<Vec<Angle>> {
    if step.0 == 0 {
        return Err(SweepError::InvalidRange("step must not be zero".into()));
    }

    let span = stop.0.checked_sub(start.0).ok_or_else(|| {
        SweepError::InvalidRange(format!("span from {} to {} is too large", start, stop))
    })?;
    if span != 0 && span.signum() != step.0.signum() {
        return Err(SweepError::InvalidRange(format!(
            "step {} does not lead from {} to {}",
            step, start, stop
        )));
    }

    // Same signs here, so truncating division is the floor.
    let count = span / step.0 + 1;
    if count > MAX_RANGE_LEN {
        return Err(SweepError::InvalidRange(format!(
            "{} to {} in steps of {} gives {} angles, at most {} allowed",
            start, stop, step, count, MAX_RANGE_LEN
        )));
    }

    (0..count)
        .map(|i| {
            i.checked_mul(step.0)
                .and_then(|offset| start.0.checked_add(offset))
                .map(Angle)
                .ok_or_else(|| SweepError::InvalidRange("angle out of range".into()))
        })
        .collect()
}
