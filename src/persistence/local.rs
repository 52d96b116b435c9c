//! SQLite-backed ride store.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use uuid::Uuid;

use super::{PersistenceError, RidePersistence, RideRecord, SessionStore};
use crate::recording::types::{PersistedSession, RideId, RideSnapshot, SessionCheckpoint};
use crate::sensors::types::CoordinateSample;
use crate::storage::database::{Database, DatabaseError};

impl From<DatabaseError> for PersistenceError {
    fn from(err: DatabaseError) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

/// Stores rides and the session autosave in the local database.
///
/// Rides are owned by `user_id`; without one, saves fail with
/// [`PersistenceError::NotAuthenticated`].
#[derive(Clone)]
pub struct LocalRideStore {
    database: Arc<Mutex<Database>>,
    user_id: Option<Uuid>,
}

impl LocalRideStore {
    pub fn new(database: Database, user_id: Option<Uuid>) -> Self {
        Self {
            database: Arc::new(Mutex::new(database)),
            user_id,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn set_user_id(&mut self, user_id: Option<Uuid>) {
        self.user_id = user_id;
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, PersistenceError> {
        self.database
            .lock()
            .map_err(|_| PersistenceError::Storage("database lock poisoned".to_string()))
    }

    /// Store a snapshot. Returns the ride id, whether or not it was new.
    pub fn save_snapshot(&self, snapshot: &RideSnapshot) -> Result<RideId, PersistenceError> {
        let user_id = self.user_id.ok_or(PersistenceError::NotAuthenticated)?;
        let record = RideRecord::from_snapshot(snapshot, user_id);

        let inserted = self.lock()?.insert_ride(&record, &snapshot.coordinates)?;
        if inserted {
            tracing::info!(
                "Stored ride {} ({} coordinates, {:.2} km)",
                record.id,
                snapshot.coordinates.len(),
                record.distance_km
            );
        } else {
            tracing::debug!("Ride {} already stored", record.id);
        }

        Ok(record.id)
    }

    // ========== History ==========

    pub fn get_ride(&self, id: &RideId) -> Result<Option<RideRecord>, PersistenceError> {
        Ok(self.lock()?.get_ride(id)?)
    }

    pub fn get_ride_coordinates(
        &self,
        id: &RideId,
    ) -> Result<Vec<CoordinateSample>, PersistenceError> {
        Ok(self.lock()?.get_ride_coordinates(id)?)
    }

    /// Rides for one bike (or all bikes), newest first.
    pub fn list_rides(
        &self,
        bike_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<RideRecord>, PersistenceError> {
        Ok(self.lock()?.list_rides(bike_id, limit, None)?)
    }

    pub fn count_rides(&self, bike_id: Option<&str>) -> Result<usize, PersistenceError> {
        Ok(self.lock()?.count_rides(bike_id)?)
    }
}

impl RidePersistence for LocalRideStore {
    fn save_ride<'a>(
        &'a self,
        snapshot: &'a RideSnapshot,
    ) -> BoxFuture<'a, Result<RideId, PersistenceError>> {
        Box::pin(async move { self.save_snapshot(snapshot) })
    }
}

impl SessionStore for LocalRideStore {
    fn persist_session(&self, checkpoint: &SessionCheckpoint<'_>) -> Result<(), PersistenceError> {
        Ok(self.lock()?.save_session(checkpoint)?)
    }

    fn load_persisted_session(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        Ok(self.lock()?.load_session()?)
    }

    fn clear_persisted_session(&self) -> Result<(), PersistenceError> {
        Ok(self.lock()?.clear_session()?)
    }
}
