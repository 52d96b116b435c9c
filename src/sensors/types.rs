//! Sensor sample types and the producer abstraction.
//!
//! Each hardware producer (location, orientation, proximity) pushes samples
//! into its own bounded channel. Producers are started with a sender and
//! stopped explicitly; dropping a subscription is never relied on for
//! cancellation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Kind of hardware producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// GPS / location fixes
    Location,
    /// Device roll angle
    Orientation,
    /// Proximity (covered / uncovered)
    Proximity,
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorKind::Location => write!(f, "Location"),
            SensorKind::Orientation => write!(f, "Orientation"),
            SensorKind::Proximity => write!(f, "Proximity"),
        }
    }
}

/// A single GPS fix. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSample {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Speed reported by the receiver in meters/second
    pub speed_mps: Option<f64>,
    /// Fix timestamp
    pub timestamp: DateTime<Utc>,
}

impl CoordinateSample {
    /// Create a fix without a reported speed.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps: None,
            timestamp,
        }
    }

    /// Attach the receiver-reported speed.
    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }
}

/// A raw roll reading from the orientation producer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    /// Raw roll angle in degrees, before calibration
    pub raw_angle: f64,
    /// Reading timestamp
    pub timestamp: DateTime<Utc>,
}

impl OrientationSample {
    pub fn new(raw_angle: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            raw_angle,
            timestamp,
        }
    }
}

/// A proximity reading. `near == true` means the sensor is covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityReading {
    pub near: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProximityReading {
    pub fn new(near: bool, timestamp: DateTime<Utc>) -> Self {
        Self { near, timestamp }
    }
}

/// Any sample delivered by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorEvent {
    Location(CoordinateSample),
    Orientation(OrientationSample),
    Proximity(ProximityReading),
}

impl SensorEvent {
    /// The producer this event came from.
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorEvent::Location(_) => SensorKind::Location,
            SensorEvent::Orientation(_) => SensorKind::Orientation,
            SensorEvent::Proximity(_) => SensorKind::Proximity,
        }
    }
}

/// A startable / stoppable hardware producer.
///
/// `start` hands the producer the sending half of its channel. After `stop`
/// returns the producer must not send again.
pub trait SensorSource<T>: Send {
    /// Begin delivering samples into `sink`.
    fn start(&mut self, sink: mpsc::Sender<T>) -> Result<(), SensorError>;

    /// Stop delivering samples. Must be idempotent.
    fn stop(&mut self);

    /// Whether the producer is currently delivering.
    fn is_running(&self) -> bool;
}

/// Boxed location producer.
pub type LocationSource = Box<dyn SensorSource<CoordinateSample>>;
/// Boxed orientation producer.
pub type OrientationSource = Box<dyn SensorSource<OrientationSample>>;
/// Boxed proximity producer.
pub type ProximitySource = Box<dyn SensorSource<ProximityReading>>;

/// The producers feeding one recorder. Orientation and proximity are optional.
pub struct SensorSet {
    pub location: LocationSource,
    pub orientation: Option<OrientationSource>,
    pub proximity: Option<ProximitySource>,
}

impl SensorSet {
    /// A set with only a location producer.
    pub fn location_only(location: LocationSource) -> Self {
        Self {
            location,
            orientation: None,
            proximity: None,
        }
    }

    pub fn with_orientation(mut self, orientation: OrientationSource) -> Self {
        self.orientation = Some(orientation);
        self
    }

    pub fn with_proximity(mut self, proximity: ProximitySource) -> Self {
        self.proximity = Some(proximity);
        self
    }
}

/// Sending halves of the per-producer channels.
#[derive(Debug, Clone)]
pub struct SensorSenders {
    pub location: mpsc::Sender<CoordinateSample>,
    pub orientation: mpsc::Sender<OrientationSample>,
    pub proximity: mpsc::Sender<ProximityReading>,
}

/// Receiving halves of the per-producer channels, drained by a single consumer.
#[derive(Debug)]
pub struct SensorReceivers {
    pub location: mpsc::Receiver<CoordinateSample>,
    pub orientation: mpsc::Receiver<OrientationSample>,
    pub proximity: mpsc::Receiver<ProximityReading>,
}

impl SensorReceivers {
    /// Pull every sample that is already queued, without waiting.
    ///
    /// Order is preserved within each producer; the cross-producer order is
    /// location, orientation, proximity.
    pub fn drain_pending(&mut self) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        while let Ok(fix) = self.location.try_recv() {
            events.push(SensorEvent::Location(fix));
        }
        while let Ok(sample) = self.orientation.try_recv() {
            events.push(SensorEvent::Orientation(sample));
        }
        while let Ok(reading) = self.proximity.try_recv() {
            events.push(SensorEvent::Proximity(reading));
        }
        events
    }
}

/// Create the three bounded producer channels.
pub fn sensor_channels(capacity: usize) -> (SensorSenders, SensorReceivers) {
    let capacity = capacity.max(1);
    let (location_tx, location_rx) = mpsc::channel(capacity);
    let (orientation_tx, orientation_rx) = mpsc::channel(capacity);
    let (proximity_tx, proximity_rx) = mpsc::channel(capacity);

    (
        SensorSenders {
            location: location_tx,
            orientation: orientation_tx,
            proximity: proximity_tx,
        },
        SensorReceivers {
            location: location_rx,
            orientation: orientation_rx,
            proximity: proximity_rx,
        },
    )
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    /// The user or platform refused access to the sensor
    #[error("{0} permission denied")]
    PermissionDenied(SensorKind),

    /// The hardware or platform lacks the sensor
    #[error("{0} sensor unavailable")]
    Unavailable(SensorKind),

    /// The producer failed after starting
    #[error("{kind} sensor failed: {message}")]
    Failed { kind: SensorKind, message: String },
}

impl SensorError {
    /// Which producer the error belongs to.
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorError::PermissionDenied(kind) | SensorError::Unavailable(kind) => *kind,
            SensorError::Failed { kind, .. } => *kind,
        }
    }
}
