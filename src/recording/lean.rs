//! Lean angle estimation from calibrated roll readings.
//!
//! Sign convention: positive angles lean right, negative angles lean left.
//! Both maxima are stored as non-negative magnitudes.

use crate::recording::calibration::CalibrationStore;
use serde::{Deserialize, Serialize};

/// Default plausibility bound for a calibrated reading, in degrees.
pub const DEFAULT_MAX_LEAN_DEGREES: f64 = 90.0;

/// Running lean state for one session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeanAngleEstimator {
    max_plausible: f64,
    current: f64,
    max_left: f64,
    max_right: f64,
    last_raw: Option<f64>,
}

impl Default for LeanAngleEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEAN_DEGREES)
    }
}

/// Calibrated lean for a raw reading, or `None` if it is outside `±max_plausible`.
pub fn calibrated_lean(
    raw_angle: f64,
    calibration: &CalibrationStore,
    max_plausible: f64,
) -> Option<f64> {
    let angle = calibration.apply(raw_angle);
    if angle.is_finite() && angle.abs() <= max_plausible {
        Some(angle)
    } else {
        None
    }
}

impl LeanAngleEstimator {
    pub fn new(max_plausible: f64) -> Self {
        Self {
            max_plausible: max_plausible.abs(),
            current: 0.0,
            max_left: 0.0,
            max_right: 0.0,
            last_raw: None,
        }
    }

    /// Feed one raw reading. Returns the accepted calibrated angle.
    ///
    /// Glitches outside the plausible range are dropped: they update neither
    /// the current angle nor the maxima. Any finite reading is still kept as
    /// the calibration reference, so a device mounted at a steep angle can be
    /// zeroed.
    pub fn apply(&mut self, raw_angle: f64, calibration: &CalibrationStore) -> Option<f64> {
        if raw_angle.is_finite() {
            self.last_raw = Some(raw_angle);
        }

        let Some(angle) = calibrated_lean(raw_angle, calibration, self.max_plausible)
        else {
            tracing::debug!("Dropped implausible orientation reading {:.1}°", raw_angle);
            return None;
        };

        self.current = angle;
        if angle > 0.0 {
            self.max_right = self.max_right.max(angle);
        } else if angle < 0.0 {
            self.max_left = self.max_left.max(-angle);
        }

        Some(angle)
    }

    /// Current calibrated lean (negative = left).
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Largest left lean seen, as a magnitude.
    pub fn max_left(&self) -> f64 {
        self.max_left
    }

    /// Largest right lean seen.
    pub fn max_right(&self) -> f64 {
        self.max_right
    }

    /// The last finite raw reading, used as the calibration reference.
    pub fn last_raw(&self) -> Option<f64> {
        self.last_raw
    }

    /// Re-express the current angle after the calibration offset changed.
    ///
    /// Maxima are left untouched so they never decrease.
    pub fn recalibrated(&mut self, calibration: &CalibrationStore) {
        if let Some(angle) = self
            .last_raw
            .and_then(|raw| calibrated_lean(raw, calibration, self.max_plausible))
        {
            self.current = angle;
        }
    }
}
