//! Recording types: session state, the live session record, snapshots and errors.

use crate::recording::calibration::CalibrationStore;
use crate::recording::lean::{LeanAngleEstimator, DEFAULT_MAX_LEAN_DEGREES};
use crate::recording::pocket::PocketMonitor;
use crate::recording::track::GpsTrackAccumulator;
use crate::sensors::types::{CoordinateSample, SensorError, SensorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier of a ride record. Generated on the client when the ride starts,
/// so retried saves of the same snapshot can be deduplicated.
pub type RideId = Uuid;

/// Lifecycle state of the ride session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No ride in progress
    #[default]
    Idle,
    /// Actively recording
    Recording,
    /// Recording paused; samples are ignored
    Paused,
    /// Producers are being torn down
    Stopping,
    /// Persistence call in flight
    Saving,
    /// Persistence failed; the snapshot is retained for retry
    SaveFailed,
    /// Ride thrown away
    Discarded,
    /// Ride stored
    Saved,
}

impl SessionState {
    /// A new ride may start from idle or after a previous ride ended.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Saved | SessionState::Discarded
        )
    }

    /// States that hold session data worth recovering after a restart.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionState::Recording
                | SessionState::Paused
                | SessionState::Stopping
                | SessionState::Saving
                | SessionState::SaveFailed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Recording => write!(f, "Recording"),
            SessionState::Paused => write!(f, "Paused"),
            SessionState::Stopping => write!(f, "Stopping"),
            SessionState::Saving => write!(f, "Saving"),
            SessionState::SaveFailed => write!(f, "Save failed"),
            SessionState::Discarded => write!(f, "Discarded"),
            SessionState::Saved => write!(f, "Saved"),
        }
    }
}

/// The mutable record of one recording attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideSession {
    /// Client-generated ride identifier
    pub ride_id: RideId,
    /// Bike the ride belongs to
    pub bike_id: String,
    /// Set when recording starts; never changes afterwards
    pub started_at: DateTime<Utc>,
    /// Orientation zero-offset for this session
    pub calibration: CalibrationStore,
    /// Lean readings and maxima
    pub lean: LeanAngleEstimator,
    /// Trajectory, distance and speed
    pub track: GpsTrackAccumulator,
    /// Proximity-driven pocket mode
    pub pocket: PocketMonitor,
    /// Start of the current pause, if paused
    pub paused_at: Option<DateTime<Utc>>,
    /// Total seconds spent paused, excluding the current pause
    pub paused_seconds: f64,
}

impl RideSession {
    /// A fresh session with every derived value at zero.
    pub fn new(bike_id: String, config: &RecorderConfig) -> Self {
        Self {
            ride_id: Uuid::new_v4(),
            bike_id,
            started_at: Utc::now(),
            calibration: CalibrationStore::new(),
            lean: LeanAngleEstimator::new(config.max_lean_degrees),
            track: GpsTrackAccumulator::new(config.speed_smoothing_window),
            pocket: PocketMonitor::new(),
            paused_at: None,
            paused_seconds: 0.0,
        }
    }

    pub fn distance_km(&self) -> f64 {
        self.track.distance_km()
    }

    pub fn coordinates(&self) -> &[CoordinateSample] {
        self.track.coordinates()
    }

    pub fn current_lean_angle(&self) -> f64 {
        self.lean.current()
    }

    pub fn max_lean_left(&self) -> f64 {
        self.lean.max_left()
    }

    pub fn max_lean_right(&self) -> f64 {
        self.lean.max_right()
    }

    pub fn calibration_offset(&self) -> f64 {
        self.calibration.offset()
    }

    pub fn pocket_mode(&self) -> bool {
        self.pocket.pocket_mode()
    }

    /// Seconds of active (unpaused) riding up to `now`.
    pub fn active_seconds(&self, now: DateTime<Utc>) -> f64 {
        let total = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        let current_pause = self
            .paused_at
            .map(|p| (now - p).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        (total - self.paused_seconds - current_pause).max(0.0)
    }

    /// Close the current pause, if any, folding it into the paused total.
    pub fn end_pause(&mut self, now: DateTime<Utc>) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_seconds += ((now - paused_at).num_milliseconds() as f64 / 1000.0).max(0.0);
        }
    }

    /// Immutable copy of the session for persistence.
    pub fn snapshot(&self, ended_at: DateTime<Utc>) -> RideSnapshot {
        RideSnapshot {
            ride_id: self.ride_id,
            bike_id: self.bike_id.clone(),
            started_at: self.started_at,
            ended_at,
            duration_seconds: self.active_seconds(ended_at).round() as u32,
            distance_km: self.distance_km(),
            max_lean_left: self.max_lean_left(),
            max_lean_right: self.max_lean_right(),
            max_speed_mps: self.track.max_speed_mps(),
            coordinates: self.coordinates().to_vec(),
        }
    }
}

/// Immutable copy of a finished session, handed to the persistence pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub ride_id: RideId,
    pub bike_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Active riding time, pauses excluded
    pub duration_seconds: u32,
    pub distance_km: f64,
    pub max_lean_left: f64,
    pub max_lean_right: f64,
    pub max_speed_mps: Option<f64>,
    pub coordinates: Vec<CoordinateSample>,
}

impl RideSnapshot {
    /// Average speed over active time in km/h.
    pub fn avg_speed_kmh(&self) -> Option<f64> {
        if self.duration_seconds == 0 {
            None
        } else {
            Some(self.distance_km / (self.duration_seconds as f64 / 3600.0))
        }
    }
}

/// What a session looks like on disk for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub state: SessionState,
    pub session: Option<RideSession>,
    /// Snapshot held while saving or after a failed save
    pub pending_snapshot: Option<RideSnapshot>,
    pub saved_at: DateTime<Utc>,
}

/// Borrowed view of the recorder written at each autosave.
///
/// Serializes to the same shape a [`PersistedSession`] is read back from.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionCheckpoint<'a> {
    pub state: SessionState,
    pub session: Option<&'a RideSession>,
    pub pending_snapshot: Option<&'a RideSnapshot>,
    pub saved_at: DateTime<Utc>,
}

/// Result of a successful `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The ride was thrown away without touching persistence
    Discarded,
    /// The ride was stored under this id
    Saved(RideId),
}

/// Configuration for the ride recorder.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Autosave the session after this many applied samples
    pub autosave_every_samples: u32,
    /// Plausible lean range after calibration, in degrees
    pub max_lean_degrees: f64,
    /// Number of reported speeds averaged for display
    pub speed_smoothing_window: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            autosave_every_samples: 25,
            max_lean_degrees: DEFAULT_MAX_LEAN_DEGREES,
            speed_smoothing_window: crate::metrics::smoothing::DEFAULT_SPEED_WINDOW,
        }
    }
}

/// Live summary for display while riding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveRideSummary {
    pub state: SessionState,
    pub bike_id: Option<String>,
    /// Active time in seconds
    pub elapsed_seconds: u32,
    pub distance_km: f64,
    pub coordinate_count: usize,
    /// Speed reported by the latest fix, `None` when unknown
    pub current_speed_mps: Option<f64>,
    /// Smoothed reported speed
    pub display_speed_mps: Option<f64>,
    pub max_speed_mps: Option<f64>,
    pub current_lean_angle: f64,
    pub max_lean_left: f64,
    pub max_lean_right: f64,
    pub calibration_offset: f64,
    pub pocket_mode: bool,
}

impl LiveRideSummary {
    pub fn from_session(state: SessionState, session: &RideSession, now: DateTime<Utc>) -> Self {
        Self {
            state,
            bike_id: Some(session.bike_id.clone()),
            elapsed_seconds: session.active_seconds(now) as u32,
            distance_km: session.distance_km(),
            coordinate_count: session.track.len(),
            current_speed_mps: session.track.current_speed_mps(),
            display_speed_mps: session.track.display_speed_mps(),
            max_speed_mps: session.track.max_speed_mps(),
            current_lean_angle: session.current_lean_angle(),
            max_lean_left: session.max_lean_left(),
            max_lean_right: session.max_lean_right(),
            calibration_offset: session.calibration_offset(),
            pocket_mode: session.pocket_mode(),
        }
    }
}

/// Errors from the ride recorder.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecorderError {
    /// Lifecycle method called from a state that does not permit it
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Sensor access refused; recording cannot start
    #[error("{0} permission denied")]
    PermissionDenied(SensorKind),

    /// Required sensor missing on this platform
    #[error("{0} sensor unavailable")]
    SensorUnavailable(SensorKind),

    /// Calibration requested before any orientation reading arrived
    #[error("No orientation reading to calibrate against")]
    NoOrientationSample,

    /// Persistence failed; the session is retained for retry
    #[error("Failed to save ride: {0}")]
    SaveFailed(String),

    /// Persistence requires a fresh login before retrying
    #[error("Not authenticated - sign in again before saving")]
    NotAuthenticated,

    /// Failed to load recovery data
    #[error("Failed to recover ride: {0}")]
    RecoveryFailed(String),

    /// The driver task has shut down
    #[error("Ride driver is not running")]
    DriverClosed,
}

impl RecorderError {
    pub(crate) fn invalid(operation: &'static str, state: SessionState) -> Self {
        RecorderError::InvalidState { operation, state }
    }

    /// Whether calling `stop(true)` / `retry_save` again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RecorderError::SaveFailed(_))
    }
}

impl From<SensorError> for RecorderError {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::PermissionDenied(kind) => RecorderError::PermissionDenied(kind),
            other => RecorderError::SensorUnavailable(other.kind()),
        }
    }
}
