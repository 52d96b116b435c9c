//! GPS track accumulation.
//!
//! Fixes are kept in arrival order. Out-of-order or duplicate fixes are
//! accepted as-is; a duplicate simply contributes zero distance. Distance is
//! never smoothed, so the total can always be reproduced from the stored
//! trajectory with [`track_distance_km`].

use crate::metrics::smoothing::RollingAverage;
use crate::sensors::types::CoordinateSample;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers (haversine).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Sum of haversine distances between consecutive fixes.
pub fn track_distance_km(coordinates: &[CoordinateSample]) -> f64 {
    coordinates
        .windows(2)
        .map(|pair| {
            haversine_km(
                pair[0].latitude,
                pair[0].longitude,
                pair[1].latitude,
                pair[1].longitude,
            )
        })
        .sum()
}

/// Ordered trajectory plus the values derived from it.
///
/// The trajectory itself is not serialized: the autosave appends it
/// incrementally and hands it back through [`GpsTrackAccumulator::restore_coordinates`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsTrackAccumulator {
    #[serde(skip)]
    coordinates: Vec<CoordinateSample>,
    distance_km: f64,
    current_speed_mps: Option<f64>,
    max_speed_mps: Option<f64>,
    #[serde(default)]
    display_speed: RollingAverage,
}

impl Default for GpsTrackAccumulator {
    fn default() -> Self {
        Self::new(crate::metrics::smoothing::DEFAULT_SPEED_WINDOW)
    }
}

impl GpsTrackAccumulator {
    pub fn new(speed_window: usize) -> Self {
        Self {
            coordinates: Vec::new(),
            distance_km: 0.0,
            current_speed_mps: None,
            max_speed_mps: None,
            display_speed: RollingAverage::new(speed_window),
        }
    }

    /// Append a fix and integrate its distance from the previous one.
    ///
    /// Returns the distance added in kilometers.
    pub fn push(&mut self, fix: CoordinateSample) -> f64 {
        let delta = self
            .coordinates
            .last()
            .map(|prev| haversine_km(prev.latitude, prev.longitude, fix.latitude, fix.longitude))
            .filter(|d| d.is_finite())
            .unwrap_or(0.0);

        self.distance_km += delta;

        // Speed comes only from the receiver; never derived from fix spacing.
        self.current_speed_mps = fix.speed_mps.filter(|s| s.is_finite() && *s >= 0.0);
        if let Some(speed) = self.current_speed_mps {
            self.display_speed.add(speed);
            self.max_speed_mps = Some(self.max_speed_mps.map_or(speed, |m| m.max(speed)));
        }

        self.coordinates.push(fix);
        delta
    }

    pub fn coordinates(&self) -> &[CoordinateSample] {
        &self.coordinates
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn distance_km(&self) -> f64 {
        self.distance_km
    }

    /// Speed reported by the latest fix; `None` when unknown.
    pub fn current_speed_mps(&self) -> Option<f64> {
        self.current_speed_mps
    }

    /// Rolling average of reported speeds, for display only.
    pub fn display_speed_mps(&self) -> Option<f64> {
        self.display_speed.average()
    }

    pub fn max_speed_mps(&self) -> Option<f64> {
        self.max_speed_mps
    }

    /// Put back a trajectory stored apart from the derived values.
    pub fn restore_coordinates(&mut self, coordinates: Vec<CoordinateSample>) {
        self.coordinates = coordinates;
    }

    /// Forget the current speed, e.g. while paused.
    pub fn clear_speed(&mut self) {
        self.current_speed_mps = None;
        self.display_speed.reset();
    }
}
