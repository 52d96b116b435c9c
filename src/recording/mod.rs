//! Ride recording: the session state machine and the pieces it is built from.

pub mod calibration;
pub mod driver;
pub mod lean;
pub mod pocket;
pub mod recorder;
pub mod track;
pub mod types;

pub use calibration::CalibrationStore;
pub use driver::{RideDriver, RideHandle};
pub use lean::LeanAngleEstimator;
pub use pocket::PocketMonitor;
pub use recorder::RideRecorder;
pub use track::{haversine_km, track_distance_km, GpsTrackAccumulator};
pub use types::{
    LiveRideSummary, PersistedSession, RecorderConfig, RecorderError, RideId, RideSession,
    RideSnapshot, SessionCheckpoint, SessionState, StopOutcome,
};
