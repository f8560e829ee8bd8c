//! Closed time intervals used to tag response matrices with their validity window.
//!
//! Intervals are immutable values: shifting or intersecting returns a new
//! interval. Interval expressions of the form `"t1 - t2"` can be parsed
//! with [`TimeInterval::from_str`], accepting signed numbers and exponents
//! on either side of the separating dash.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors that can occur when building or parsing time intervals
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeIntervalError {
    #[error("Interval bounds must be finite, got {start}..{stop}")]
    NonFinite { start: f64, stop: f64 },

    #[error("Interval start must not exceed stop, got {start}..{stop}")]
    Reversed { start: f64, stop: f64 },

    #[error("Cannot parse interval expression '{0}', expected 't1 - t2'")]
    Malformed(String),
}

/// Closed interval `[start, stop]` on the time axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInterval {
    start: f64,
    stop: f64,
}

impl TimeInterval {
    /// Create a new interval, rejecting non-finite or reversed bounds.
    pub fn new(start: f64, stop: f64) -> Result<Self, TimeIntervalError> {
        if !start.is_finite() || !stop.is_finite() {
            return Err(TimeIntervalError::NonFinite { start, stop });
        }
        if start > stop {
            return Err(TimeIntervalError::Reversed { start, stop });
        }
        Ok(Self { start, stop })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stop(&self) -> f64 {
        self.stop
    }

    pub fn duration(&self) -> f64 {
        self.stop - self.start
    }

    pub fn half_time(&self) -> f64 {
        (self.start + self.stop) / 2.0
    }

    /// Return a new interval with both bounds translated by `offset`.
    pub fn shift(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            stop: self.stop + offset,
        }
    }

    /// Whether the two intervals share a region of non-zero extent.
    ///
    /// Intervals that merely touch at an endpoint do not overlap. A
    /// zero-width interval overlaps another one only when it lies strictly
    /// inside it, or when both intervals are identical.
    pub fn overlaps_with(&self, other: &TimeInterval) -> bool {
        if self == other {
            return true;
        }
        self.start < other.stop && other.start < self.stop
    }

    /// Whether `other` lies entirely within this interval.
    pub fn contains_interval(&self, other: &TimeInterval) -> bool {
        self.start <= other.start && other.stop <= self.stop
    }

    /// Whether `time` lies within the closed interval.
    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time <= self.stop
    }

    /// Common part of two overlapping intervals, or `None` if they are disjoint.
    pub fn intersect(&self, other: &TimeInterval) -> Option<TimeInterval> {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        if start > stop {
            return None;
        }
        Some(TimeInterval { start, stop })
    }

    /// Whether `next` starts where this interval stops.
    ///
    /// `tolerance` is absolute, in seconds.
    pub fn is_contiguous_with(&self, next: &TimeInterval, tolerance: f64) -> bool {
        approx_equal(self.stop, next.start, tolerance)
    }
}

/// Compare two times within an absolute tolerance in seconds.
pub(crate) fn approx_equal(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.stop)
    }
}

impl FromStr for TimeInterval {
    type Err = TimeIntervalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, stop) = parse_interval(s)?;
        TimeInterval::new(start, stop)
    }
}

/// Split an interval expression `"t1 - t2"` into its two bounds.
///
/// Every dash that is not a leading sign or an exponent sign is tried as
/// the separator; the first split where both sides parse as numbers wins.
///
/// Valid expressions:
/// - "5.0 - 25.0", "5-25", " 0.0 -30.0 "
/// - "-10.0 - -2.5", "1e2 - 2.5e2", "-1e-3--5e-4"
pub fn parse_interval(s: &str) -> Result<(f64, f64), TimeIntervalError> {
    let malformed = || TimeIntervalError::Malformed(s.to_string());
    let trimmed = s.trim();
    let bytes = trimmed.as_bytes();

    for (idx, &byte) in bytes.iter().enumerate() {
        if byte != b'-' || idx == 0 {
            continue;
        }
        if matches!(bytes[idx - 1], b'e' | b'E') {
            continue;
        }

        let (left, right) = (&trimmed[..idx], &trimmed[idx + 1..]);
        if let (Ok(start), Ok(stop)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
            return Ok((start, stop));
        }
    }

    Err(malformed())
}
