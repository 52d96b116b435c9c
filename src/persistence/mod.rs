//! Persistence pipeline: turns a finished ride snapshot into a durable record.
//!
//! Two boundaries live here:
//! - [`RidePersistence`], the single `save_ride` operation. Implementations
//!   must be all-or-nothing and must dedupe on the snapshot's ride id so a
//!   retried save never creates a second record.
//! - [`SessionStore`], the crash-recovery store for the in-progress session.

pub mod http;
pub mod local;

use crate::recording::types::{PersistedSession, RideId, RideSnapshot, SessionCheckpoint};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use http::{BackendConfig, HttpRideBackend};
pub use local::LocalRideStore;

/// Stores finished rides.
pub trait RidePersistence: Send + Sync {
    /// Persist the whole snapshot or nothing. Saving the same snapshot twice
    /// returns the same id without duplicating the record.
    fn save_ride<'a>(
        &'a self,
        snapshot: &'a RideSnapshot,
    ) -> BoxFuture<'a, Result<RideId, PersistenceError>>;
}

/// Durable store for the in-progress session.
pub trait SessionStore: Send + Sync {
    /// Replace the stored session with `checkpoint`. Stores may append only
    /// the coordinates added since the previous call for the same ride.
    fn persist_session(&self, checkpoint: &SessionCheckpoint<'_>) -> Result<(), PersistenceError>;

    fn load_persisted_session(&self) -> Result<Option<PersistedSession>, PersistenceError>;

    fn clear_persisted_session(&self) -> Result<(), PersistenceError>;
}

/// Summary row for a stored ride, owned by a bike and a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRecord {
    pub id: RideId,
    pub user_id: Uuid,
    pub bike_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub distance_km: f64,
    pub max_lean_left: f64,
    pub max_lean_right: f64,
    pub max_speed_mps: Option<f64>,
    pub avg_speed_kmh: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl RideRecord {
    /// Build the record for `snapshot` on behalf of `user_id`.
    pub fn from_snapshot(snapshot: &RideSnapshot, user_id: Uuid) -> Self {
        Self {
            id: snapshot.ride_id,
            user_id,
            bike_id: snapshot.bike_id.clone(),
            started_at: snapshot.started_at,
            ended_at: snapshot.ended_at,
            duration_seconds: snapshot.duration_seconds,
            distance_km: snapshot.distance_km,
            max_lean_left: snapshot.max_lean_left,
            max_lean_right: snapshot.max_lean_right,
            max_speed_mps: snapshot.max_speed_mps,
            avg_speed_kmh: snapshot.avg_speed_kmh(),
            created_at: Utc::now(),
        }
    }
}

/// Persistence failures, classified for retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PersistenceError {
    /// Transport failure; retry later
    #[error("Network error: {0}")]
    Network(String),

    /// Backend rejected or failed the request transiently
    #[error("Backend error: {0}")]
    Backend(String),

    /// No authenticated user; retry only after logging in again
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Local storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PersistenceError {
    /// Everything except a missing login may succeed on a plain retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PersistenceError::NotAuthenticated)
    }
}
