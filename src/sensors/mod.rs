//! Sensor producers: location, orientation and proximity streams.

pub mod replay;
pub mod types;

pub use replay::{ReplayError, ReplaySource, ReplayTrace};
pub use types::{
    sensor_channels, CoordinateSample, LocationSource, OrientationSample, OrientationSource,
    ProximityReading, ProximitySource, SensorError, SensorEvent, SensorKind, SensorReceivers,
    SensorSenders, SensorSet, SensorSource,
};
