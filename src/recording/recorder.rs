//! Ride session state machine.
//!
//! `RideRecorder` owns the session, the sensor producers and the persistence
//! boundary. Lifecycle methods are only legal from specific states; an illegal
//! call returns [`RecorderError::InvalidState`] and changes nothing.
//!
//! ```text
//! Idle ──start──▶ Recording ◀──resume── Paused
//!                   │  └──────pause──────▶ │
//!                   └────────stop──────────┴──▶ Stopping
//!   Stopping ──save=false──▶ Discarded
//!   Stopping ──save=true───▶ Saving ──ok──▶ Saved
//!                              └──err──▶ SaveFailed ──retry──▶ Saving
//! ```
//!
//! The session is autosaved to the [`SessionStore`] after every transition
//! and every `autosave_every_samples` applied samples.

use std::sync::Arc;

use chrono::Utc;

use crate::persistence::{RidePersistence, SessionStore};
use crate::recording::types::{
    LiveRideSummary, PersistedSession, RecorderConfig, RecorderError, RideId, RideSession,
    RideSnapshot, SessionCheckpoint, SessionState, StopOutcome,
};
use crate::sensors::types::{
    CoordinateSample, OrientationSample, ProximityReading, SensorEvent, SensorSenders, SensorSet,
};

/// Records one ride at a time from the sensor producers.
pub struct RideRecorder {
    config: RecorderConfig,
    state: SessionState,
    session: Option<RideSession>,
    /// Snapshot handed to persistence, kept until it is stored
    pending_snapshot: Option<RideSnapshot>,
    sensors: SensorSet,
    senders: SensorSenders,
    persistence: Arc<dyn RidePersistence>,
    store: Option<Arc<dyn SessionStore>>,
    samples_since_autosave: u32,
}

impl RideRecorder {
    /// Create a recorder. Producers publish into `senders` once started.
    pub fn new(
        config: RecorderConfig,
        sensors: SensorSet,
        senders: SensorSenders,
        persistence: Arc<dyn RidePersistence>,
    ) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            session: None,
            pending_snapshot: None,
            sensors,
            senders,
            persistence,
            store: None,
            samples_since_autosave: 0,
        }
    }

    /// Enable autosave and crash recovery through `store`.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session being recorded, or awaiting a save.
    pub fn session(&self) -> Option<&RideSession> {
        self.session.as_ref()
    }

    pub fn pending_snapshot(&self) -> Option<&RideSnapshot> {
        self.pending_snapshot.as_ref()
    }

    // ========== Lifecycle ==========

    /// Start recording a new ride for `bike_id`.
    ///
    /// The location producer is required: if it cannot start, the error is
    /// returned and the recorder stays where it was. Orientation and
    /// proximity failures only degrade the ride.
    pub fn start(&mut self, bike_id: &str) -> Result<RideId, RecorderError> {
        if !self.state.can_start() {
            return Err(RecorderError::invalid("start", self.state));
        }

        let bike_id = bike_id.trim();
        if bike_id.is_empty() {
            return Err(RecorderError::invalid("start", self.state));
        }

        self.sensors
            .location
            .start(self.senders.location.clone())
            .map_err(|e| {
                tracing::error!("Cannot start recording: {}", e);
                RecorderError::from(e)
            })?;

        let mut session = RideSession::new(bike_id.to_string(), &self.config);
        self.start_optional_sensors(&mut session);
        let ride_id = session.ride_id;

        self.session = Some(session);
        self.pending_snapshot = None;
        self.state = SessionState::Recording;

        tracing::info!("Started recording ride {} on bike {}", ride_id, bike_id);
        self.autosave();
        Ok(ride_id)
    }

    /// Pause recording. Samples are ignored until `resume`.
    pub fn pause(&mut self) -> Result<(), RecorderError> {
        if self.state != SessionState::Recording {
            return Err(RecorderError::invalid("pause", self.state));
        }

        if let Some(proximity) = self.sensors.proximity.as_mut() {
            proximity.stop();
        }
        if let Some(session) = self.session.as_mut() {
            session.paused_at = Some(Utc::now());
            session.pocket.disarm();
            session.track.clear_speed();
        }
        self.state = SessionState::Paused;

        tracing::info!("Paused recording");
        self.autosave();
        Ok(())
    }

    /// Resume a paused ride.
    ///
    /// A ride recovered as paused has no running producers; the location
    /// producer is started here and, if it cannot start, the ride stays
    /// paused and the error is returned.
    pub fn resume(&mut self) -> Result<(), RecorderError> {
        if self.state != SessionState::Paused {
            return Err(RecorderError::invalid("resume", self.state));
        }

        if !self.sensors.location.is_running() {
            self.sensors
                .location
                .start(self.senders.location.clone())
                .map_err(|e| {
                    tracing::error!("Cannot resume recording: {}", e);
                    RecorderError::from(e)
                })?;
        }

        let now = Utc::now();
        let mut session = self.session.take();
        if let Some(session) = session.as_mut() {
            session.end_pause(now);
            self.start_optional_sensors(session);
        }
        self.session = session;
        self.state = SessionState::Recording;

        tracing::info!("Resumed recording");
        self.autosave();
        Ok(())
    }

    /// Zero the lean angle against the latest raw orientation reading.
    ///
    /// Allowed whenever a session is held, including after a failed save.
    /// Returns the new offset. Fails without changing anything if no
    /// orientation reading has arrived yet. A retained snapshot is not
    /// affected.
    pub fn calibrate(&mut self) -> Result<f64, RecorderError> {
        if !self.state.is_recoverable() {
            return Err(RecorderError::invalid("calibrate", self.state));
        }

        let session = self
            .session
            .as_mut()
            .ok_or(RecorderError::invalid("calibrate", self.state))?;
        let raw = session
            .lean
            .last_raw()
            .ok_or(RecorderError::NoOrientationSample)?;

        let offset = session.calibration.calibrate_against(raw);
        let calibration = session.calibration;
        session.lean.recalibrated(&calibration);

        self.autosave();
        Ok(offset)
    }

    /// Stop the ride, then save or discard it.
    ///
    /// From `SaveFailed`, `stop(true)` retries the save and `stop(false)`
    /// discards the retained ride. Discarding never touches persistence.
    pub async fn stop(&mut self, save: bool) -> Result<StopOutcome, RecorderError> {
        match self.state {
            SessionState::Recording | SessionState::Paused => {
                self.state = SessionState::Stopping;
                self.stop_sensors();

                let now = Utc::now();
                if let Some(session) = self.session.as_mut() {
                    session.end_pause(now);
                    session.pocket.disarm();
                }

                if !save {
                    return Ok(self.discard());
                }

                self.pending_snapshot = self.session.as_ref().map(|s| s.snapshot(now));
                self.save_pending().await
            }
            SessionState::SaveFailed if save => self.save_pending().await,
            SessionState::SaveFailed => Ok(self.discard()),
            state => Err(RecorderError::invalid("stop", state)),
        }
    }

    /// Retry persisting a ride whose save failed.
    pub async fn retry_save(&mut self) -> Result<StopOutcome, RecorderError> {
        if self.state != SessionState::SaveFailed {
            return Err(RecorderError::invalid("retry save", self.state));
        }
        self.save_pending().await
    }

    /// Stop every producer. Used when the owner shuts down.
    pub fn shutdown(&mut self) {
        self.stop_sensors();
        if self.state.is_recoverable() {
            self.autosave();
        }
    }

    // ========== Sample ingestion ==========

    /// Apply a GPS fix. Returns `false` if it was ignored.
    pub fn record_coordinate(&mut self, fix: CoordinateSample) -> bool {
        let Some(session) = self.recording_session() else {
            return false;
        };
        session.track.push(fix);
        self.note_sample();
        true
    }

    /// Apply an orientation reading. Returns `false` if it was ignored or
    /// dropped as implausible.
    pub fn record_orientation(&mut self, sample: OrientationSample) -> bool {
        let Some(session) = self.recording_session() else {
            return false;
        };
        let calibration = session.calibration;
        let accepted = session.lean.apply(sample.raw_angle, &calibration).is_some();
        if accepted {
            self.note_sample();
        }
        accepted
    }

    /// Apply a proximity reading. Returns `true` if pocket mode changed.
    pub fn record_proximity(&mut self, reading: ProximityReading) -> bool {
        let Some(session) = self.recording_session() else {
            return false;
        };
        let changed = session.pocket.apply(reading.near);
        if changed {
            self.note_sample();
        }
        changed
    }

    /// Apply any sensor event.
    pub fn apply_event(&mut self, event: SensorEvent) -> bool {
        match event {
            SensorEvent::Location(fix) => self.record_coordinate(fix),
            SensorEvent::Orientation(sample) => self.record_orientation(sample),
            SensorEvent::Proximity(reading) => self.record_proximity(reading),
        }
    }

    /// Current values for display.
    pub fn live_summary(&self) -> LiveRideSummary {
        match &self.session {
            Some(session) => LiveRideSummary::from_session(self.state, session, Utc::now()),
            None => LiveRideSummary {
                state: self.state,
                ..Default::default()
            },
        }
    }

    // ========== Crash recovery ==========

    /// Restore a session autosaved before the process went away.
    ///
    /// A ride that was recording resumes recording (or comes back paused if
    /// the location producer cannot start). A ride caught mid-save comes back
    /// as `SaveFailed`, since the outcome is unknown and saves are idempotent.
    /// Returns the recovered state, or `None` if there was nothing to recover.
    pub fn recover(&mut self) -> Result<Option<SessionState>, RecorderError> {
        if !self.state.can_start() {
            return Err(RecorderError::invalid("recover", self.state));
        }

        let Some(store) = self.store.clone() else {
            return Ok(None);
        };

        let persisted = store
            .load_persisted_session()
            .map_err(|e| RecorderError::RecoveryFailed(e.to_string()))?;

        let Some(persisted) = persisted else {
            return Ok(None);
        };

        let PersistedSession {
            state,
            session,
            pending_snapshot,
            saved_at,
        } = persisted;

        let Some(mut session) = session.filter(|_| state.is_recoverable()) else {
            tracing::debug!("Autosaved session in state {} has nothing to recover", state);
            if let Err(e) = store.clear_persisted_session() {
                tracing::warn!("Failed to clear stale autosave: {}", e);
            }
            return Ok(None);
        };

        // Producers are gone after a restart.
        session.pocket.disarm();

        let recovered = match state {
            SessionState::Recording => {
                // The gap since the last autosave is not riding time.
                session.paused_at = Some(saved_at);
                match self.sensors.location.start(self.senders.location.clone()) {
                    Ok(()) => {
                        session.end_pause(Utc::now());
                        self.start_optional_sensors(&mut session);
                        SessionState::Recording
                    }
                    Err(e) => {
                        tracing::warn!("Location unavailable on recovery, ride paused: {}", e);
                        SessionState::Paused
                    }
                }
            }
            SessionState::Saving | SessionState::SaveFailed => {
                let snapshot = pending_snapshot.unwrap_or_else(|| session.snapshot(saved_at));
                self.pending_snapshot = Some(snapshot);
                SessionState::SaveFailed
            }
            _ => {
                if session.paused_at.is_none() {
                    session.paused_at = Some(saved_at);
                }
                SessionState::Paused
            }
        };

        tracing::info!(
            "Recovered ride {} ({} coordinates) as {}",
            session.ride_id,
            session.track.len(),
            recovered
        );

        self.session = Some(session);
        self.state = recovered;
        self.autosave();
        Ok(Some(recovered))
    }

    /// Drop any autosaved session without restoring it.
    pub fn discard_recovery(&mut self) -> Result<(), RecorderError> {
        if !self.state.can_start() {
            return Err(RecorderError::invalid("discard recovery", self.state));
        }

        if let Some(store) = &self.store {
            store
                .clear_persisted_session()
                .map_err(|e| RecorderError::RecoveryFailed(e.to_string()))?;
            tracing::info!("Discarded crash recovery data");
        }
        Ok(())
    }

    // ========== Internals ==========

    fn recording_session(&mut self) -> Option<&mut RideSession> {
        if self.state == SessionState::Recording {
            self.session.as_mut()
        } else {
            None
        }
    }

    fn start_optional_sensors(&mut self, session: &mut RideSession) {
        if let Some(orientation) = self.sensors.orientation.as_mut() {
            if !orientation.is_running() {
                if let Err(e) = orientation.start(self.senders.orientation.clone()) {
                    tracing::warn!("Recording without lean angle: {}", e);
                }
            }
        }
        self.arm_pocket_monitor(session);
    }

    fn arm_pocket_monitor(&mut self, session: &mut RideSession) {
        let Some(proximity) = self.sensors.proximity.as_mut() else {
            return;
        };
        match proximity.start(self.senders.proximity.clone()) {
            Ok(()) => session.pocket.arm(),
            Err(e) => tracing::warn!("Recording without pocket detection: {}", e),
        }
    }

    fn stop_sensors(&mut self) {
        self.sensors.location.stop();
        if let Some(orientation) = self.sensors.orientation.as_mut() {
            orientation.stop();
        }
        if let Some(proximity) = self.sensors.proximity.as_mut() {
            proximity.stop();
        }
    }

    fn discard(&mut self) -> StopOutcome {
        let ride_id = self.session.take().map(|s| s.ride_id);
        self.pending_snapshot = None;
        self.state = SessionState::Discarded;
        self.autosave();

        match ride_id {
            Some(id) => tracing::info!("Discarded ride {}", id),
            None => tracing::info!("Discarded ride"),
        }
        StopOutcome::Discarded
    }

    async fn save_pending(&mut self) -> Result<StopOutcome, RecorderError> {
        let snapshot = match (&self.pending_snapshot, &self.session) {
            (Some(snapshot), _) => snapshot.clone(),
            (None, Some(session)) => session.snapshot(Utc::now()),
            (None, None) => {
                return Err(RecorderError::SaveFailed("no ride to save".to_string()));
            }
        };
        self.pending_snapshot = Some(snapshot.clone());
        self.state = SessionState::Saving;
        self.autosave();

        let persistence = Arc::clone(&self.persistence);
        match persistence.save_ride(&snapshot).await {
            Ok(id) => {
                self.session = None;
                self.pending_snapshot = None;
                self.state = SessionState::Saved;
                self.autosave();

                tracing::info!(
                    "Saved ride {} ({:.2} km, {} coordinates)",
                    id,
                    snapshot.distance_km,
                    snapshot.coordinates.len()
                );
                Ok(StopOutcome::Saved(id))
            }
            Err(e) => {
                self.state = SessionState::SaveFailed;
                self.autosave();

                tracing::error!("Failed to save ride {}: {}", snapshot.ride_id, e);
                if e.is_retryable() {
                    Err(RecorderError::SaveFailed(e.to_string()))
                } else {
                    Err(RecorderError::NotAuthenticated)
                }
            }
        }
    }

    fn note_sample(&mut self) {
        self.samples_since_autosave += 1;
        if self.samples_since_autosave >= self.config.autosave_every_samples {
            self.autosave();
        }
    }

    /// Write the session to the store, or clear it once nothing is left to recover.
    fn autosave(&mut self) {
        self.samples_since_autosave = 0;
        let Some(store) = &self.store else {
            return;
        };

        let result = if self.state.is_recoverable() {
            store.persist_session(&SessionCheckpoint {
                state: self.state,
                session: self.session.as_ref(),
                pending_snapshot: self.pending_snapshot.as_ref(),
                saved_at: Utc::now(),
            })
        } else {
            store.clear_persisted_session()
        };

        match result {
            Ok(()) => tracing::debug!("Autosaved session in state {}", self.state),
            Err(e) => tracing::warn!("Autosave failed: {}", e),
        }
    }
}

impl Drop for RideRecorder {
    fn drop(&mut self) {
        self.stop_sensors();
    }
}
