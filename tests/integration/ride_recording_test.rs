//! Integration tests for ride recording.
//!
//! Drives the full pipeline: mock producers publish into the sensor channels,
//! the driver applies samples to the recorder, and stop hands the snapshot to
//! a mock persistence backend.

use std::sync::Arc;

use chrono::{Duration, Utc};

use ridetrack::persistence::PersistenceError;
use ridetrack::recording::{
    haversine_km, track_distance_km, RecorderConfig, RecorderError, RideDriver, RideHandle,
    RideRecorder, SessionState, StopOutcome,
};
use ridetrack::sensors::{
    sensor_channels, CoordinateSample, OrientationSample, ProximityReading, SensorError,
    SensorKind, SensorSet,
};

use crate::sensor_mock::{northbound_track, MockPersistence, MockSource};

struct Rig {
    handle: RideHandle,
    location: MockSource<CoordinateSample>,
    orientation: MockSource<OrientationSample>,
    proximity: MockSource<ProximityReading>,
    persistence: Arc<MockPersistence>,
}

fn rig() -> Rig {
    let location = MockSource::new();
    let orientation = MockSource::new();
    let proximity = MockSource::new();
    let persistence = Arc::new(MockPersistence::default());

    let sensors = SensorSet::location_only(location.boxed())
        .with_orientation(orientation.boxed())
        .with_proximity(proximity.boxed());
    let (senders, receivers) = sensor_channels(64);
    let recorder = RideRecorder::new(
        RecorderConfig::default(),
        sensors,
        senders,
        persistence.clone(),
    );

    Rig {
        handle: RideDriver::spawn(recorder, receivers),
        location,
        orientation,
        proximity,
        persistence,
    }
}

fn raw(angle: f64) -> OrientationSample {
    OrientationSample::new(angle, Utc::now())
}

#[tokio::test]
async fn test_example_ride_distance_and_lean() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();

    let t0 = Utc::now();
    for (i, lon) in [0.0, 0.001, 0.002].into_iter().enumerate() {
        assert!(
            rig.location
                .push(CoordinateSample::new(0.0, lon, t0 + Duration::seconds(i as i64)))
                .await
        );
    }
    rig.orientation.push(raw(12.0)).await;
    rig.orientation.push(raw(-5.0)).await;

    let summary = rig.handle.live_summary().await.unwrap();
    let expected = 2.0 * haversine_km(0.0, 0.0, 0.0, 0.001);
    assert!((summary.distance_km - expected).abs() < 1e-9);
    assert_eq!(summary.coordinate_count, 3);
    assert_eq!(summary.max_lean_right, 12.0);
    assert_eq!(summary.max_lean_left, 5.0);
    assert_eq!(summary.current_lean_angle, -5.0);
}

#[tokio::test]
async fn test_distance_matches_stored_trajectory() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();

    let fixes = northbound_track(50, Utc::now());
    for (i, fix) in fixes.iter().enumerate() {
        rig.location.push(fix.clone()).await;
        // Interleaved orientation and proximity readings do not affect distance.
        rig.orientation.push(raw(i as f64 % 30.0)).await;
        rig.proximity
            .push(ProximityReading::new(i % 7 == 0, Utc::now()))
            .await;
    }

    let outcome = rig.handle.stop(true).await.unwrap();
    assert!(matches!(outcome, StopOutcome::Saved(_)));

    let saved = rig.persistence.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].coordinates, fixes);
    assert!((saved[0].distance_km - track_distance_km(&fixes)).abs() < 1e-12);
    assert_eq!(saved[0].max_speed_mps, Some(11.0));
}

#[tokio::test]
async fn test_pause_freezes_derived_state() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();

    let fixes = northbound_track(10, Utc::now());
    for fix in &fixes[..5] {
        rig.location.push(fix.clone()).await;
    }
    rig.orientation.push(raw(20.0)).await;

    rig.handle.pause().await.unwrap();
    let frozen = rig.handle.live_summary().await.unwrap();
    assert_eq!(frozen.state, SessionState::Paused);

    rig.location.push(CoordinateSample::new(50.0, 10.0, Utc::now())).await;
    rig.orientation.push(raw(-40.0)).await;

    let paused = rig.handle.live_summary().await.unwrap();
    assert_eq!(paused.distance_km, frozen.distance_km);
    assert_eq!(paused.coordinate_count, 5);
    assert_eq!(paused.max_lean_left, 0.0);
    assert_eq!(paused.max_lean_right, 20.0);

    rig.handle.resume().await.unwrap();
    for fix in &fixes[5..] {
        rig.location.push(fix.clone()).await;
    }

    let resumed = rig.handle.live_summary().await.unwrap();
    assert_eq!(resumed.coordinate_count, 10);
    assert!((resumed.distance_km - track_distance_km(&fixes)).abs() < 1e-9);
}

#[tokio::test]
async fn test_pause_stops_pocket_detection() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();

    rig.proximity.push(ProximityReading::new(true, Utc::now())).await;
    assert!(rig.handle.live_summary().await.unwrap().pocket_mode);

    rig.handle.pause().await.unwrap();
    assert!(!rig.proximity.running());
    assert!(!rig.handle.live_summary().await.unwrap().pocket_mode);

    rig.handle.resume().await.unwrap();
    assert!(rig.proximity.running());
    assert_eq!(rig.proximity.starts(), 2);
}

#[tokio::test]
async fn test_calibration_zeroes_next_identical_sample() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();

    assert_eq!(
        rig.handle.calibrate().await,
        Err(RecorderError::NoOrientationSample)
    );

    rig.orientation.push(raw(7.5)).await;
    assert_eq!(rig.handle.calibrate().await, Ok(7.5));

    rig.orientation.push(raw(7.5)).await;
    let summary = rig.handle.live_summary().await.unwrap();
    assert!(summary.current_lean_angle.abs() < 1e-9);
    assert_eq!(summary.calibration_offset, 7.5);
}

#[tokio::test]
async fn test_maxima_reset_only_on_start() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();
    rig.orientation.push(raw(25.0)).await;
    rig.orientation.push(raw(-10.0)).await;
    rig.orientation.push(raw(3.0)).await;

    let summary = rig.handle.live_summary().await.unwrap();
    assert_eq!(summary.max_lean_right, 25.0);
    assert_eq!(summary.max_lean_left, 10.0);

    rig.handle.stop(false).await.unwrap();
    rig.handle.start("B1").await.unwrap();

    let fresh = rig.handle.live_summary().await.unwrap();
    assert_eq!(fresh.max_lean_right, 0.0);
    assert_eq!(fresh.max_lean_left, 0.0);
    assert_eq!(fresh.distance_km, 0.0);
}

#[tokio::test]
async fn test_permission_denied_blocks_start() {
    let rig = rig();
    rig.location
        .set_failure(Some(SensorError::PermissionDenied(SensorKind::Location)));

    assert_eq!(
        rig.handle.start("B1").await,
        Err(RecorderError::PermissionDenied(SensorKind::Location))
    );
    assert_eq!(
        rig.handle.live_summary().await.unwrap().state,
        SessionState::Idle
    );

    rig.location.set_failure(None);
    rig.handle.start("B1").await.unwrap();
}

#[tokio::test]
async fn test_missing_orientation_degrades_gracefully() {
    let rig = rig();
    rig.orientation
        .set_failure(Some(SensorError::Unavailable(SensorKind::Orientation)));

    rig.handle.start("B1").await.unwrap();
    for fix in northbound_track(3, Utc::now()) {
        rig.location.push(fix).await;
    }

    let summary = rig.handle.live_summary().await.unwrap();
    assert_eq!(summary.state, SessionState::Recording);
    assert_eq!(summary.coordinate_count, 3);
    assert_eq!(summary.max_lean_right, 0.0);
    assert_eq!(summary.current_lean_angle, 0.0);
}

#[tokio::test]
async fn test_save_failure_then_retry_produces_same_record() {
    let rig = rig();
    rig.persistence
        .fail_next(vec![PersistenceError::Network("connection reset".into())]);

    rig.handle.start("B1").await.unwrap();
    for fix in northbound_track(20, Utc::now()) {
        rig.location.push(fix).await;
    }
    rig.orientation.push(raw(-14.0)).await;
    let before = rig.handle.live_summary().await.unwrap();

    let err = rig.handle.stop(true).await.unwrap_err();
    assert!(matches!(err, RecorderError::SaveFailed(_)));

    let retained = rig.handle.live_summary().await.unwrap();
    assert_eq!(retained.state, SessionState::SaveFailed);
    assert_eq!(retained.coordinate_count, before.coordinate_count);
    assert_eq!(retained.distance_km, before.distance_km);
    assert_eq!(retained.max_lean_left, 14.0);

    let outcome = rig.handle.stop(true).await.unwrap();
    let StopOutcome::Saved(id) = outcome else {
        panic!("expected a saved ride, got {:?}", outcome);
    };

    let saved = rig.persistence.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].ride_id, id);
    assert_eq!(saved[0].coordinates.len(), 20);
    assert_eq!(saved[0].distance_km, before.distance_km);
    assert_eq!(rig.persistence.calls(), 2);
}

#[tokio::test]
async fn test_retry_save_after_repeated_failures() {
    let rig = rig();
    rig.persistence.fail_next(vec![
        PersistenceError::Backend("503".into()),
        PersistenceError::Network("timeout".into()),
    ]);

    rig.handle.start("B1").await.unwrap();
    rig.location
        .push(CoordinateSample::new(45.0, 7.0, Utc::now()))
        .await;

    assert!(rig.handle.stop(true).await.is_err());
    assert!(rig.handle.retry_save().await.is_err());
    assert!(matches!(
        rig.handle.retry_save().await,
        Ok(StopOutcome::Saved(_))
    ));
    assert_eq!(rig.persistence.saved().len(), 1);
}

#[tokio::test]
async fn test_discard_never_persists_even_after_failure() {
    let rig = rig();
    rig.persistence
        .fail_next(vec![PersistenceError::NotAuthenticated]);

    rig.handle.start("B1").await.unwrap();
    rig.location
        .push(CoordinateSample::new(45.0, 7.0, Utc::now()))
        .await;

    assert_eq!(
        rig.handle.stop(true).await,
        Err(RecorderError::NotAuthenticated)
    );
    assert_eq!(rig.persistence.calls(), 1);

    assert_eq!(
        rig.handle.stop(false).await.unwrap(),
        StopOutcome::Discarded
    );
    let summary = rig.handle.live_summary().await.unwrap();
    assert_eq!(summary.state, SessionState::Discarded);
    assert_eq!(summary.coordinate_count, 0);
    assert_eq!(rig.persistence.calls(), 1);
}

#[tokio::test]
async fn test_stop_releases_producers() {
    let rig = rig();
    rig.handle.start("B1").await.unwrap();
    assert!(rig.location.running());
    assert!(rig.orientation.running());

    rig.handle.stop(false).await.unwrap();
    assert!(!rig.location.running());
    assert!(!rig.orientation.running());
    assert!(!rig.proximity.running());
    assert!(!rig.location.push(CoordinateSample::new(0.0, 0.0, Utc::now())).await);
}

#[tokio::test]
async fn test_invalid_lifecycle_calls_are_rejected() {
    let rig = rig();

    assert!(matches!(
        rig.handle.start("").await,
        Err(RecorderError::InvalidState {
            state: SessionState::Idle,
            ..
        })
    ));
    assert_eq!(rig.location.starts(), 0);
    assert!(matches!(
        rig.handle.pause().await,
        Err(RecorderError::InvalidState { .. })
    ));
    assert!(matches!(
        rig.handle.stop(true).await,
        Err(RecorderError::InvalidState { .. })
    ));

    let ride_id = rig.handle.start("B1").await.unwrap();
    assert!(matches!(
        rig.handle.start("B2").await,
        Err(RecorderError::InvalidState {
            state: SessionState::Recording,
            ..
        })
    ));
    assert!(matches!(
        rig.handle.retry_save().await,
        Err(RecorderError::InvalidState { .. })
    ));

    rig.handle.stop(true).await.unwrap();
    assert_eq!(rig.persistence.saved()[0].ride_id, ride_id);
    assert_eq!(rig.persistence.saved()[0].bike_id, "B1");
}
