//! Database operations using rusqlite.
//!
//! Stores finished rides with their trajectory, and a single-row session
//! autosave used for crash recovery.

use crate::persistence::RideRecord;
use crate::recording::types::{PersistedSession, SessionCheckpoint};
use crate::sensors::types::CoordinateSample;
use crate::storage::schema::{
    CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE, SESSION_TRACK_SCHEMA,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &PathBuf) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        }

        if from_version < 2 {
            // Trajectories move out of the autosave blob; an old blob still
            // carries them, so recovery data from version 1 is dropped.
            self.conn
                .execute_batch(SESSION_TRACK_SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
            if from_version == 1 {
                self.conn
                    .execute("DELETE FROM session_autosave", [])
                    .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
            }
        }

        self.conn
            .execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                [CURRENT_VERSION],
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        Ok(())
    }

    // ========== Ride Operations ==========

    /// Insert a ride and its trajectory in one transaction.
    ///
    /// Returns `false` without writing anything if a ride with the same id
    /// already exists, which makes retried saves idempotent.
    pub fn insert_ride(
        &mut self,
        record: &RideRecord,
        coordinates: &[CoordinateSample],
    ) -> Result<bool, DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM rides WHERE id = ?1",
                params![record.id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if exists.is_some() {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO rides (id, user_id, bike_id, started_at, ended_at, duration_seconds,
             distance_km, max_lean_left, max_lean_right, max_speed_mps, avg_speed_kmh, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.to_string(),
                record.user_id.to_string(),
                record.bike_id,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                record.duration_seconds,
                record.distance_km,
                record.max_lean_left,
                record.max_lean_right,
                record.max_speed_mps,
                record.avg_speed_kmh,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO ride_coordinates (ride_id, seq, latitude, longitude, speed_mps, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            for (seq, fix) in coordinates.iter().enumerate() {
                stmt.execute(params![
                    record.id.to_string(),
                    seq as i64,
                    fix.latitude,
                    fix.longitude,
                    fix.speed_mps,
                    fix.timestamp.to_rfc3339(),
                ])
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(true)
    }

    /// Get a ride by ID.
    pub fn get_ride(&self, id: &Uuid) -> Result<Option<RideRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, bike_id, started_at, ended_at, duration_seconds, distance_km,
                 max_lean_left, max_lean_right, max_speed_mps, avg_speed_kmh, created_at
                 FROM rides WHERE id = ?1",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let result = stmt.query_row(params![id.to_string()], RideRow::from_row);

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Get the trajectory of a ride, in the order it was recorded.
    pub fn get_ride_coordinates(
        &self,
        ride_id: &Uuid,
    ) -> Result<Vec<CoordinateSample>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT latitude, longitude, speed_mps, recorded_at
                 FROM ride_coordinates WHERE ride_id = ?1 ORDER BY seq",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        read_coordinates(&mut stmt, ride_id)
    }

    /// List rides, newest first, optionally for one bike.
    pub fn list_rides(
        &self,
        bike_id: Option<&str>,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<RideRecord>, DatabaseError> {
        let limit = limit.unwrap_or(100);
        let offset = offset.unwrap_or(0);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, bike_id, started_at, ended_at, duration_seconds, distance_km,
                 max_lean_left, max_lean_right, max_speed_mps, avg_speed_kmh, created_at
                 FROM rides WHERE (?1 IS NULL OR bike_id = ?1)
                 ORDER BY started_at DESC LIMIT ?2 OFFSET ?3",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![bike_id, limit, offset], RideRow::from_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut rides = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            rides.push(row.into_record()?);
        }

        Ok(rides)
    }

    /// Count rides, optionally for one bike.
    pub fn count_rides(&self, bike_id: Option<&str>) -> Result<usize, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM rides WHERE (?1 IS NULL OR bike_id = ?1)",
                params![bike_id],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count as usize)
    }

    // ========== Session Autosave Operations ==========

    /// Save the in-progress session for crash recovery, replacing any previous one.
    ///
    /// Session metadata is rewritten each time; the trajectory is appended,
    /// so only fixes not yet stored for this ride are written. A checkpoint
    /// for a different ride drops the previous ride's fixes.
    pub fn save_session(&mut self, checkpoint: &SessionCheckpoint<'_>) -> Result<(), DatabaseError> {
        let session_json = serde_json::to_string(checkpoint)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tx.execute(
            "INSERT OR REPLACE INTO session_autosave (id, state, session_json, saved_at)
             VALUES (1, ?1, ?2, ?3)",
            params![
                checkpoint.state.to_string(),
                session_json,
                checkpoint.saved_at.to_rfc3339()
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        match checkpoint.session {
            Some(session) => {
                let ride_id = session.ride_id.to_string();
                tx.execute(
                    "DELETE FROM session_coordinates WHERE ride_id != ?1",
                    params![ride_id],
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

                let stored: i64 = tx
                    .query_row(
                        "SELECT COALESCE(MAX(seq) + 1, 0) FROM session_coordinates WHERE ride_id = ?1",
                        params![ride_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

                let mut stmt = tx
                    .prepare(
                        "INSERT INTO session_coordinates (ride_id, seq, latitude, longitude, speed_mps, recorded_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

                let coordinates = session.coordinates();
                for (seq, fix) in coordinates.iter().enumerate().skip(stored as usize) {
                    stmt.execute(params![
                        ride_id,
                        seq as i64,
                        fix.latitude,
                        fix.longitude,
                        fix.speed_mps,
                        fix.timestamp.to_rfc3339(),
                    ])
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
                }
            }
            None => {
                tx.execute("DELETE FROM session_coordinates", [])
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Load the autosaved session with its trajectory.
    pub fn load_session(&self) -> Result<Option<PersistedSession>, DatabaseError> {
        let result: Result<String, _> = self.conn.query_row(
            "SELECT session_json FROM session_autosave WHERE id = 1",
            [],
            |row| row.get(0),
        );

        let session_json = match result {
            Ok(session_json) => session_json,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(DatabaseError::QueryFailed(e.to_string())),
        };

        let mut persisted: PersistedSession = serde_json::from_str(&session_json)
            .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;

        if let Some(session) = persisted.session.as_mut() {
            let coordinates = self.get_session_coordinates(&session.ride_id)?;
            session.track.restore_coordinates(coordinates);
        }

        Ok(Some(persisted))
    }

    fn get_session_coordinates(&self, ride_id: &Uuid) -> Result<Vec<CoordinateSample>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT latitude, longitude, speed_mps, recorded_at
                 FROM session_coordinates WHERE ride_id = ?1 ORDER BY seq",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        read_coordinates(&mut stmt, ride_id)
    }

    /// Clear the autosaved session and its trajectory.
    pub fn clear_session(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch("DELETE FROM session_autosave; DELETE FROM session_coordinates;")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}

/// Read `(latitude, longitude, speed_mps, recorded_at)` rows for one ride.
fn read_coordinates(
    stmt: &mut rusqlite::Statement<'_>,
    ride_id: &Uuid,
) -> Result<Vec<CoordinateSample>, DatabaseError> {
    let rows = stmt
        .query_map(params![ride_id.to_string()], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

    let mut coordinates = Vec::new();
    for row in rows {
        let (latitude, longitude, speed_mps, recorded_at) =
            row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        coordinates.push(CoordinateSample {
            latitude,
            longitude,
            speed_mps,
            timestamp: parse_timestamp(&recorded_at, "coordinate time")?,
        });
    }

    Ok(coordinates)
}

fn parse_timestamp(value: &str, what: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::DeserializationError(format!("Invalid {}: {}", what, e)))
}

/// Intermediate struct for reading ride rows from database.
struct RideRow {
    id: String,
    user_id: String,
    bike_id: String,
    started_at: String,
    ended_at: String,
    duration_seconds: u32,
    distance_km: f64,
    max_lean_left: f64,
    max_lean_right: f64,
    max_speed_mps: Option<f64>,
    avg_speed_kmh: Option<f64>,
    created_at: String,
}

impl RideRow {
    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            bike_id: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            duration_seconds: row.get(5)?,
            distance_km: row.get(6)?,
            max_lean_left: row.get(7)?,
            max_lean_right: row.get(8)?,
            max_speed_mps: row.get(9)?,
            avg_speed_kmh: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_record(self) -> Result<RideRecord, DatabaseError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| DatabaseError::DeserializationError(format!("Invalid UUID: {}", e)))?;

        let user_id = Uuid::parse_str(&self.user_id).map_err(|e| {
            DatabaseError::DeserializationError(format!("Invalid user UUID: {}", e))
        })?;

        Ok(RideRecord {
            id,
            user_id,
            bike_id: self.bike_id,
            started_at: parse_timestamp(&self.started_at, "start date")?,
            ended_at: parse_timestamp(&self.ended_at, "end date")?,
            duration_seconds: self.duration_seconds,
            distance_km: self.distance_km,
            max_lean_left: self.max_lean_left,
            max_lean_right: self.max_lean_right,
            max_speed_mps: self.max_speed_mps,
            avg_speed_kmh: self.avg_speed_kmh,
            created_at: parse_timestamp(&self.created_at, "created date")?,
        })
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
