//! Live metric helpers.

pub mod smoothing;

pub use smoothing::RollingAverage;
