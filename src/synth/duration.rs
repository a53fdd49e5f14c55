//! Scale factor arithmetic for fitting synthesized speech to a window.
//!
//! `scale_factor = target / natural`: above 1 the speech is slowed down,
//! below 1 it is sped up. ffmpeg's `atempo` takes the inverse.

use serde::{Deserialize, Serialize};

/// How one clip will be brought to its target duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalePlan {
    /// `target / natural` before clamping
    pub requested: f64,
    /// Factor actually applied, inside the safe range
    pub applied: f64,
    /// The requested factor was outside the safe range
    pub clamped: bool,
    /// Time-stretching runs; false inside the dead band
    pub stretch: bool,
}

impl ScalePlan {
    /// Tempo for a pitch-preserving stretch
    pub fn tempo(&self) -> f64 {
        if self.stretch { 1.0 / self.applied } else { 1.0 }
    }

    /// Duration the clip will have after stretching, before any fitting
    pub fn stretched_duration(&self, natural: f64) -> f64 {
        if self.stretch { natural * self.applied } else { natural }
    }

    /// Whether the result is trimmed or padded to exactly the target length.
    /// Clamped clips keep their residual so the assembler can absorb it.
    pub fn fit_exactly(&self) -> bool {
        !self.clamped
    }
}

/// Safe range and dead band for scale factors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleLimits {
    pub min: f64,
    pub max: f64,
    pub dead_band: f64,
}

impl ScaleLimits {
    pub fn new(min: f64, max: f64, dead_band: f64) -> Self {
        Self { min, max, dead_band }
    }

    /// `None` when the natural duration cannot be used (zero, negative, NaN)
    pub fn plan(&self, target: f64, natural: f64) -> Option<ScalePlan> {
        if !(natural.is_finite() && natural > 0.0 && target.is_finite() && target > 0.0) {
            return None;
        }

        let requested = target / natural;
        let applied = requested.clamp(self.min, self.max);
        let clamped = requested < self.min || requested > self.max;
        let stretch = (applied - 1.0).abs() >= self.dead_band;

        Some(ScalePlan {
            requested,
            applied,
            clamped,
            stretch,
        })
    }
}

impl Default for ScaleLimits {
    fn default() -> Self {
        Self::new(0.5, 2.0, 0.05)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_is_stretched_and_fit() {
        let plan = ScaleLimits::default().plan(5.0, 4.5).unwrap();
        assert!((plan.requested - 1.1111).abs() < 1e-3);
        assert_eq!(plan.applied, plan.requested);
        assert!(plan.stretch && !plan.clamped && plan.fit_exactly());
        assert!((plan.stretched_duration(4.5) - 5.0).abs() < 1e-9);
        assert!((plan.tempo() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_far_too_short_clamps_to_max() {
        // 3.2x slower requested, only 2x allowed
        let plan = ScaleLimits::default().plan(8.0, 2.5).unwrap();
        assert!((plan.requested - 3.2).abs() < 1e-9);
        assert_eq!(plan.applied, 2.0);
        assert!(plan.clamped && !plan.fit_exactly());
        assert!((plan.stretched_duration(2.5) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_far_too_long_clamps_to_min() {
        let plan = ScaleLimits::default().plan(1.0, 4.0).unwrap();
        assert_eq!(plan.applied, 0.5);
        assert!(plan.clamped);
        assert!((plan.tempo() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_boundaries_are_inside_range() {
        let limits = ScaleLimits::default();
        assert!(!limits.plan(2.0, 1.0).unwrap().clamped);
        assert!(!limits.plan(1.0, 2.0).unwrap().clamped);
    }

    #[test]
    fn test_dead_band_skips_stretching() {
        let plan = ScaleLimits::default().plan(10.0, 9.8).unwrap();
        assert!(!plan.stretch);
        assert_eq!(plan.tempo(), 1.0);
        assert!(plan.fit_exactly());
    }

    #[test]
    fn test_unmeasurable_natural_duration() {
        let limits = ScaleLimits::default();
        assert!(limits.plan(3.0, 0.0).is_none());
        assert!(limits.plan(3.0, f64::NAN).is_none());
        assert!(limits.plan(3.0, -1.0).is_none());
    }
}
