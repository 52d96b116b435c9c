//! Pocket mode from the proximity signal.

use serde::{Deserialize, Serialize};

/// Tracks whether the device looks covered (in a pocket).
///
/// The monitor only reacts while armed. Disarming tears it down and forces
/// pocket mode off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PocketMonitor {
    armed: bool,
    pocket_mode: bool,
}

impl PocketMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start reacting to proximity readings.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Stop reacting and force pocket mode off.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.pocket_mode = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn pocket_mode(&self) -> bool {
        self.pocket_mode
    }

    /// Apply a reading. Returns `true` if pocket mode changed.
    ///
    /// Repeated identical readings are no-ops.
    pub fn apply(&mut self, near: bool) -> bool {
        if !self.armed || self.pocket_mode == near {
            return false;
        }
        self.pocket_mode = near;
        tracing::debug!("Pocket mode {}", if near { "on" } else { "off" });
        true
    }
}
