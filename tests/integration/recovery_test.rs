//! Crash recovery tests against an on-disk database.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;

use ridetrack::persistence::{LocalRideStore, RidePersistence, SessionStore};
use ridetrack::recording::{
    RecorderConfig, RecorderError, RideRecorder, SessionCheckpoint, SessionState, StopOutcome,
};
use ridetrack::sensors::{
    sensor_channels, CoordinateSample, OrientationSample, SensorError, SensorKind,
    SensorReceivers, SensorSet,
};
use ridetrack::storage::Database;

use crate::sensor_mock::{northbound_track, MockSource};

struct Device {
    recorder: RideRecorder,
    store: LocalRideStore,
    location: MockSource<CoordinateSample>,
    _receivers: SensorReceivers,
}

/// A fresh process: new database handle on the same file, new recorder.
fn launch(path: &PathBuf, user_id: Option<Uuid>) -> Device {
    let database = Database::open(path).expect("Failed to open database");
    let store = LocalRideStore::new(database, user_id);
    let location = MockSource::new();
    let (senders, receivers) = sensor_channels(16);

    let recorder = RideRecorder::new(
        RecorderConfig {
            autosave_every_samples: 10,
            ..Default::default()
        },
        SensorSet::location_only(location.boxed())
            .with_orientation(MockSource::<OrientationSample>::new().boxed()),
        senders,
        Arc::new(store.clone()) as Arc<dyn RidePersistence>,
    )
    .with_session_store(Arc::new(store.clone()) as Arc<dyn SessionStore>);

    Device {
        recorder,
        store,
        location,
        _receivers: receivers,
    }
}

fn db_path() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("rides.db");
    (dir, path)
}

#[test]
fn test_recording_session_survives_restart() {
    let (_dir, path) = db_path();
    let user = Some(Uuid::new_v4());

    let ride_id = {
        let mut device = launch(&path, user);
        let ride_id = device.recorder.start("B1").unwrap();
        for fix in northbound_track(25, Utc::now()) {
            device.recorder.record_coordinate(fix);
        }
        device
            .recorder
            .record_orientation(OrientationSample::new(-22.0, Utc::now()));
        // Process killed: nothing runs after this point.
        ride_id
    };

    let mut device = launch(&path, user);
    assert_eq!(device.recorder.recover(), Ok(Some(SessionState::Recording)));
    assert!(device.location.running());

    let session = device.recorder.session().unwrap();
    assert_eq!(session.ride_id, ride_id);
    assert_eq!(session.bike_id, "B1");
    // Autosaved every 10 samples
    assert_eq!(session.track.len(), 20);

    // Recording continues from the recovered values.
    assert!(device
        .recorder
        .record_coordinate(CoordinateSample::new(45.01, 7.0, Utc::now())));
    assert_eq!(device.recorder.session().unwrap().track.len(), 21);
}

#[test]
fn test_paused_session_recovers_paused() {
    let (_dir, path) = db_path();

    {
        let mut device = launch(&path, None);
        device.recorder.start("B1").unwrap();
        device
            .recorder
            .record_coordinate(CoordinateSample::new(45.0, 7.0, Utc::now()));
        device.recorder.pause().unwrap();
    }

    let mut device = launch(&path, None);
    assert_eq!(device.recorder.recover(), Ok(Some(SessionState::Paused)));
    assert_eq!(device.recorder.session().unwrap().track.len(), 1);
    assert!(device.recorder.session().unwrap().paused_at.is_some());
    assert!(!device.location.running());

    device.recorder.resume().unwrap();
    assert_eq!(device.recorder.state(), SessionState::Recording);
    assert!(device.location.running());
    assert_eq!(device.location.starts(), 1);

    assert!(device
        .recorder
        .record_coordinate(CoordinateSample::new(45.001, 7.0, Utc::now())));
    assert_eq!(device.recorder.session().unwrap().track.len(), 2);
}

#[test]
fn test_resume_without_location_stays_paused() {
    let (_dir, path) = db_path();

    {
        let mut device = launch(&path, None);
        device.recorder.start("B1").unwrap();
        device.recorder.pause().unwrap();
    }

    let mut device = launch(&path, None);
    assert_eq!(device.recorder.recover(), Ok(Some(SessionState::Paused)));

    device
        .location
        .set_failure(Some(SensorError::PermissionDenied(SensorKind::Location)));
    assert_eq!(
        device.recorder.resume(),
        Err(RecorderError::PermissionDenied(SensorKind::Location))
    );
    assert_eq!(device.recorder.state(), SessionState::Paused);
    assert!(device.recorder.session().unwrap().paused_at.is_some());

    device.location.set_failure(None);
    device.recorder.resume().unwrap();
    assert!(device.location.running());
}

#[test]
fn test_recording_recovers_paused_without_location() {
    let (_dir, path) = db_path();

    {
        let mut device = launch(&path, None);
        device.recorder.start("B1").unwrap();
    }

    let mut device = launch(&path, None);
    device
        .location
        .set_failure(Some(SensorError::PermissionDenied(SensorKind::Location)));

    assert_eq!(device.recorder.recover(), Ok(Some(SessionState::Paused)));
    assert_eq!(
        device.store.load_persisted_session().unwrap().unwrap().state,
        SessionState::Paused
    );
}

#[tokio::test]
async fn test_failed_save_recovers_and_retries() {
    let (_dir, path) = db_path();

    let ride_id = {
        let mut device = launch(&path, None);
        let ride_id = device.recorder.start("B1").unwrap();
        for fix in northbound_track(5, Utc::now()) {
            device.recorder.record_coordinate(fix);
        }
        // No signed-in user
        assert_eq!(
            device.recorder.stop(true).await,
            Err(RecorderError::NotAuthenticated)
        );
        assert_eq!(device.recorder.state(), SessionState::SaveFailed);
        ride_id
    };

    let mut device = launch(&path, Some(Uuid::new_v4()));
    assert_eq!(device.recorder.recover(), Ok(Some(SessionState::SaveFailed)));
    assert!(!device.location.running());
    assert_eq!(
        device.recorder.pending_snapshot().unwrap().coordinates.len(),
        5
    );

    assert_eq!(
        device.recorder.retry_save().await,
        Ok(StopOutcome::Saved(ride_id))
    );
    assert_eq!(device.store.count_rides(Some("B1")).unwrap(), 1);
    assert_eq!(device.store.get_ride_coordinates(&ride_id).unwrap().len(), 5);
    assert!(device.store.load_persisted_session().unwrap().is_none());
}

#[tokio::test]
async fn test_interrupted_save_is_not_duplicated() {
    let (_dir, path) = db_path();
    let user = Some(Uuid::new_v4());

    // The ride reached the database but the process died before the
    // recorder saw the result.
    let device = launch(&path, user);
    let mut session = ridetrack::recording::RideSession::new(
        "B1".to_string(),
        &RecorderConfig::default(),
    );
    for fix in northbound_track(8, Utc::now()) {
        session.track.push(fix);
    }
    let snapshot = session.snapshot(Utc::now());
    device.store.save_ride(&snapshot).await.unwrap();
    device
        .store
        .persist_session(&SessionCheckpoint {
            state: SessionState::Saving,
            session: Some(&session),
            pending_snapshot: Some(&snapshot),
            saved_at: Utc::now(),
        })
        .unwrap();
    drop(device);

    let mut device = launch(&path, user);
    assert_eq!(device.recorder.recover(), Ok(Some(SessionState::SaveFailed)));
    let pending = device.recorder.pending_snapshot().unwrap();
    assert_eq!(pending.ride_id, snapshot.ride_id);
    assert_eq!(pending.coordinates.len(), 8);
    assert_eq!(device.recorder.session().unwrap().track.len(), 8);

    assert_eq!(
        device.recorder.stop(true).await,
        Ok(StopOutcome::Saved(snapshot.ride_id))
    );
    assert_eq!(device.store.count_rides(None).unwrap(), 1);
}

#[tokio::test]
async fn test_finished_ride_leaves_nothing_to_recover() {
    let (_dir, path) = db_path();

    {
        let mut device = launch(&path, Some(Uuid::new_v4()));
        device.recorder.start("B1").unwrap();
        device
            .recorder
            .record_coordinate(CoordinateSample::new(45.0, 7.0, Utc::now()));
        device.recorder.stop(true).await.unwrap();
    }

    let mut device = launch(&path, None);
    assert_eq!(device.recorder.recover(), Ok(None));
    assert_eq!(device.recorder.state(), SessionState::Idle);
}

#[test]
fn test_discard_recovery() {
    let (_dir, path) = db_path();

    {
        let mut device = launch(&path, None);
        device.recorder.start("B1").unwrap();
    }

    let mut device = launch(&path, None);
    device.recorder.discard_recovery().unwrap();
    assert_eq!(device.recorder.recover(), Ok(None));

    // Recovery is only offered before a new ride starts.
    device.recorder.start("B2").unwrap();
    assert!(matches!(
        device.recorder.recover(),
        Err(RecorderError::InvalidState { .. })
    ));
}
