//! Calibration store for the orientation zero-offset.

use serde::{Deserialize, Serialize};

/// Holds the zero-offset applied to raw orientation readings.
///
/// The offset only changes through [`CalibrationStore::calibrate_against`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStore {
    offset: f64,
    calibrated: bool,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current offset in degrees.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Whether a calibration has been applied this session.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Zero the reading against `raw_angle`, so the same raw value reads 0°.
    ///
    /// Calling this repeatedly with the same raw value leaves the offset unchanged.
    pub fn calibrate_against(&mut self, raw_angle: f64) -> f64 {
        self.offset = raw_angle;
        self.calibrated = true;
        tracing::info!("Calibrated orientation offset to {:.2}°", raw_angle);
        self.offset
    }

    /// Apply the offset to a raw reading.
    pub fn apply(&self, raw_angle: f64) -> f64 {
        raw_angle - self.offset
    }
}
