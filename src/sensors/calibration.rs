//! Piecewise-linear calibration curve.
//!
//! Maps a raw converter count to a physical value by linear interpolation
//! between configured `(raw, value)` points.  Inputs outside the first /
//! last point are clamped to the end values, so a curve never extrapolates.
//! The curve is read-only after construction.

use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Upper bound on stored points (fixed capacity, no heap).
pub const MAX_CAL_POINTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalPoint {
    pub raw: u16,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurve {
    points: Vec<CalPoint, MAX_CAL_POINTS>,
}

impl CalibrationCurve {
    pub fn new(points: Vec<CalPoint, MAX_CAL_POINTS>) -> Self {
        Self { points }
    }

    /// Build from a slice; points beyond `MAX_CAL_POINTS` are ignored.
    pub fn from_points(points: &[(u16, f32)]) -> Self {
        let mut v = Vec::new();
        for &(raw, value) in points.iter().take(MAX_CAL_POINTS) {
            let _ = v.push(CalPoint { raw, value });
        }
        Self { points: v }
    }

    pub fn points(&self) -> &[CalPoint] {
        &self.points
    }

    /// Raw values strictly ascending.
    pub fn is_sorted(&self) -> bool {
        self.points.windows(2).all(|w| w[0].raw < w[1].raw)
    }

    /// Interpolate a (possibly fractional, already filtered) raw count.
    pub fn apply_f32(&self, raw: f32) -> f32 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        if raw <= f32::from(first.raw) {
            return first.value;
        }
        if raw >= f32::from(last.raw) {
            return last.value;
        }
        for w in self.points.windows(2) {
            let (a, b) = (w[0], w[1]);
            let (ra, rb) = (f32::from(a.raw), f32::from(b.raw));
            if raw <= rb {
                let t = (raw - ra) / (rb - ra);
                return a.value + t * (b.value - a.value);
            }
        }
        last.value
    }

    pub fn apply(&self, raw: u16) -> f32 {
        self.apply_f32(f32::from(raw))
    }
}
