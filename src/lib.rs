//! RideTrack - Ride Recording and Telemetry Engine
//!
//! Records motorcycle rides from location, orientation and proximity
//! producers: the GPS track with its haversine distance, the calibrated lean
//! angle with left/right maxima, and pocket mode. Finished rides go through a
//! persistence pipeline that retains the ride on failure and dedupes retries;
//! the in-progress session is autosaved for crash recovery.

pub mod metrics;
pub mod persistence;
pub mod recording;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use persistence::{LocalRideStore, PersistenceError, RidePersistence, SessionStore};
pub use recording::driver::{RideDriver, RideHandle};
pub use recording::recorder::RideRecorder;
pub use recording::types::{RecorderConfig, RecorderError, SessionState, StopOutcome};
pub use storage::config::AppConfig;
