use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Non-fatal issue corrected in place by a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityWarning {
    /// Two units claimed the same stretch of time; the later one was pushed back
    TimingConflict { index: usize, overlap: f64 },
    /// Scale factor fell outside the safe range and was clamped to the boundary
    ScaleClamped { index: usize, requested: f64, applied: f64 },
    /// Synthesized speech could not be measured; no scaling was applied
    UnmeasurableClip { index: usize },
    /// Unit produced no speech and was left silent
    UnitSkipped { index: usize, reason: String },
    /// Audio past the segment end was cut so the track fits the segment
    TrailingOverrun { trimmed: f64 },
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityWarning::TimingConflict { index, overlap } => {
                write!(f, "unit {} overlaps its predecessor by {:.3}s", index, overlap)
            }
            QualityWarning::ScaleClamped { index, requested, applied } => write!(
                f,
                "unit {} needs scale factor {:.3}, clamped to {:.3}",
                index, requested, applied
            ),
            QualityWarning::UnmeasurableClip { index } => {
                write!(f, "unit {} produced a clip with no measurable duration", index)
            }
            QualityWarning::UnitSkipped { index, reason } => {
                write!(f, "unit {} left silent: {}", index, reason)
            }
            QualityWarning::TrailingOverrun { trimmed } => {
                write!(f, "trimmed {:.3}s of audio past the segment end", trimmed)
            }
        }
    }
}

/// Warnings collected over a run, persisted with the run manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub warnings: Vec<QualityWarning>,
}

impl QualityReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a warning
    pub fn push(&mut self, warning: QualityWarning) {
        warn!("Quality warning: {}", warning);
        self.warnings.push(warning);
    }

    pub fn extend(&mut self, other: QualityReport) {
        self.warnings.extend(other.warnings);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn degraded_clips(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, QualityWarning::ScaleClamped { .. } | QualityWarning::UnmeasurableClip { .. }))
            .count()
    }

    pub fn timing_conflicts(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, QualityWarning::TimingConflict { .. }))
            .count()
    }
}
