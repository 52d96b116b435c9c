//! Speed smoothing for display.
//!
//! Only the displayed speed is smoothed. Distance is always integrated from
//! raw fixes.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of reported speeds averaged for display.
pub const DEFAULT_SPEED_WINDOW: usize = 5;

/// Rolling average over the most recent reported speeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingAverage {
    /// Buffer of recent values
    buffer: VecDeque<f64>,
    /// Window size in samples
    window_size: usize,
    /// Running sum for efficient calculation
    sum: f64,
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(DEFAULT_SPEED_WINDOW)
    }
}

impl RollingAverage {
    /// Create a new rolling average with the given window size.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            buffer: VecDeque::with_capacity(window_size),
            window_size,
            sum: 0.0,
        }
    }

    /// Add a new value and return the current average.
    pub fn add(&mut self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return self.average();
        }

        self.buffer.push_back(value);
        self.sum += value;

        if self.buffer.len() > self.window_size {
            if let Some(old) = self.buffer.pop_front() {
                self.sum -= old;
            }
        }

        self.average()
    }

    /// Get the current average without adding a value.
    pub fn average(&self) -> Option<f64> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.sum / self.buffer.len() as f64)
        }
    }

    /// Reset the rolling average.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.sum = 0.0;
    }

    /// Get the number of samples in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
