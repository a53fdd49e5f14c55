//! Bounded intervals on the source or a derived timeline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DubError, Result};

/// Slack used when comparing a window end against a probed media duration.
/// Container durations are reported with millisecond rounding.
pub const MEDIA_DURATION_SLACK: f64 = 0.001;

/// A bounded interval in seconds with `0 <= start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWindow", into = "RawWindow")]
pub struct TimeWindow {
    start: f64,
    end: f64,
}

#[derive(Serialize, Deserialize)]
struct RawWindow {
    start: f64,
    end: f64,
}

impl TryFrom<RawWindow> for TimeWindow {
    type Error = DubError;

    fn try_from(raw: RawWindow) -> Result<Self> {
        TimeWindow::new(raw.start, raw.end)
    }
}

impl From<TimeWindow> for RawWindow {
    fn from(window: TimeWindow) -> Self {
        RawWindow { start: window.start, end: window.end }
    }
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || start >= end {
            return Err(DubError::OutOfRangeWindow { start, end, media_duration: None });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Check the window fits inside media of the given length.
    pub fn validate_against(&self, media_duration: f64) -> Result<()> {
        if self.end > media_duration + MEDIA_DURATION_SLACK {
            return Err(DubError::OutOfRangeWindow {
                start: self.start,
                end: self.end,
                media_duration: Some(media_duration),
            });
        }
        Ok(())
    }

    /// Intersect with `range` and re-base the result so offsets are relative
    /// to `range.start`. Returns `None` when nothing non-empty remains.
    pub fn relative_to(&self, range: &TimeWindow) -> Option<TimeWindow> {
        let start = self.start.max(range.start) - range.start;
        let end = self.end.min(range.end) - range.start;
        TimeWindow::new(start, end).ok()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}s, {:.3}s]", self.start, self.end)
    }
}

/// Number of samples covering `seconds` at `sample_rate`, rounded to nearest.
pub fn seconds_to_samples(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f64).round() as usize
}

pub fn samples_to_seconds(samples: usize, sample_rate: u32) -> f64 {
    samples as f64 / sample_rate as f64
}
