//! End-to-end tests: replayed trace → driver → local ride store.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use ridetrack::persistence::{LocalRideStore, SessionStore};
use ridetrack::recording::{
    haversine_km, RecorderConfig, RecorderError, RideDriver, RideRecorder, StopOutcome,
};
use ridetrack::sensors::{sensor_channels, ReplayTrace, SensorKind, SensorSet};
use ridetrack::storage::Database;

const TRACE: &str = r#"{
  "events": [
    {"kind": "location", "latitude": 0.0, "longitude": 0.0, "speed_mps": 10.0, "timestamp": "2024-05-01T09:00:00Z"},
    {"kind": "orientation", "raw_angle": 3.0, "timestamp": "2024-05-01T09:00:00Z"},
    {"kind": "location", "latitude": 0.0, "longitude": 0.001, "speed_mps": 12.0, "timestamp": "2024-05-01T09:00:01Z"},
    {"kind": "orientation", "raw_angle": 15.0, "timestamp": "2024-05-01T09:00:01Z"},
    {"kind": "proximity", "near": true, "timestamp": "2024-05-01T09:00:01Z"},
    {"kind": "location", "latitude": 0.0, "longitude": 0.002, "speed_mps": null, "timestamp": "2024-05-01T09:00:02Z"},
    {"kind": "orientation", "raw_angle": -8.0, "timestamp": "2024-05-01T09:00:02Z"},
    {"kind": "orientation", "raw_angle": 250.0, "timestamp": "2024-05-01T09:00:02Z"}
  ]
}"#;

async fn record_trace(store: &LocalRideStore, bike: &str) -> Result<StopOutcome, RecorderError> {
    let trace = ReplayTrace::from_json(TRACE).expect("Failed to parse trace");
    assert_eq!(trace.count(SensorKind::Location), 3);

    let (location, orientation, proximity) = trace.into_sources(Duration::ZERO);
    let mut location_done = location.finished();
    let mut orientation_done = orientation.finished();

    let (senders, receivers) = sensor_channels(4);
    let recorder = RideRecorder::new(
        RecorderConfig::default(),
        SensorSet::location_only(Box::new(location))
            .with_orientation(Box::new(orientation))
            .with_proximity(Box::new(proximity)),
        senders,
        Arc::new(store.clone()),
    )
    .with_session_store(Arc::new(store.clone()));
    let handle = RideDriver::spawn(recorder, receivers);

    handle.start(bike).await?;
    location_done.wait_for(|done| *done).await.unwrap();
    orientation_done.wait_for(|done| *done).await.unwrap();

    let outcome = handle.stop(true).await;
    handle.shutdown().await?;
    outcome
}

#[tokio::test]
async fn test_replayed_ride_is_stored() {
    let store = LocalRideStore::new(Database::open_in_memory().unwrap(), Some(Uuid::new_v4()));

    let StopOutcome::Saved(id) = record_trace(&store, "B1").await.unwrap() else {
        panic!("expected the ride to be saved");
    };

    let ride = store.get_ride(&id).unwrap().expect("Ride not stored");
    assert_eq!(ride.bike_id, "B1");
    assert!((ride.distance_km - 2.0 * haversine_km(0.0, 0.0, 0.0, 0.001)).abs() < 1e-9);
    assert_eq!(ride.max_lean_right, 15.0);
    assert_eq!(ride.max_lean_left, 8.0);
    assert_eq!(ride.max_speed_mps, Some(12.0));

    let coordinates = store.get_ride_coordinates(&id).unwrap();
    assert_eq!(coordinates.len(), 3);
    assert_eq!(coordinates[2].longitude, 0.002);
    assert_eq!(coordinates[2].speed_mps, None);

    assert!(store.load_persisted_session().unwrap().is_none());
}

#[tokio::test]
async fn test_history_is_per_bike() {
    let store = LocalRideStore::new(Database::open_in_memory().unwrap(), Some(Uuid::new_v4()));

    record_trace(&store, "B1").await.unwrap();
    record_trace(&store, "B1").await.unwrap();
    record_trace(&store, "B2").await.unwrap();

    assert_eq!(store.count_rides(None).unwrap(), 3);
    assert_eq!(store.list_rides(Some("B1"), None).unwrap().len(), 2);
    assert_eq!(store.list_rides(Some("B2"), Some(10)).unwrap().len(), 1);
    assert!(store.list_rides(Some("B3"), None).unwrap().is_empty());
}

#[tokio::test]
async fn test_signed_out_ride_is_kept_for_retry() {
    let mut store = LocalRideStore::new(Database::open_in_memory().unwrap(), None);

    assert_eq!(
        record_trace(&store, "B1").await,
        Err(RecorderError::NotAuthenticated)
    );
    assert_eq!(store.count_rides(None).unwrap(), 0);

    let persisted = store.load_persisted_session().unwrap().expect("Session lost");
    let snapshot = persisted.pending_snapshot.expect("Snapshot lost");
    assert_eq!(snapshot.coordinates.len(), 3);

    store.set_user_id(Some(Uuid::new_v4()));
    assert_eq!(store.save_snapshot(&snapshot).unwrap(), snapshot.ride_id);
    assert_eq!(store.count_rides(Some("B1")).unwrap(), 1);
}
