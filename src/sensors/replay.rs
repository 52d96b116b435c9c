//! Replay producer: feeds a recorded trace through the normal sensor channels.
//!
//! Used by the `replay` command and by tests that want real asynchronous
//! delivery instead of calling the recorder directly.

use crate::sensors::types::{
    CoordinateSample, OrientationSample, ProximityReading, SensorError, SensorEvent, SensorKind,
    SensorSource,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// A recorded sequence of sensor events, in arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayTrace {
    pub events: Vec<SensorEvent>,
}

impl ReplayTrace {
    /// Load a trace from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ReplayError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Parse a trace from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ReplayError> {
        serde_json::from_str(content).map_err(|e| ReplayError::ParseError(e.to_string()))
    }

    /// Number of events of the given kind.
    pub fn count(&self, kind: SensorKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    /// Split into one producer per sensor kind, each pacing at `interval`.
    pub fn into_sources(
        self,
        interval: Duration,
    ) -> (
        ReplaySource<CoordinateSample>,
        ReplaySource<OrientationSample>,
        ReplaySource<ProximityReading>,
    ) {
        let mut fixes = Vec::new();
        let mut orientation = Vec::new();
        let mut proximity = Vec::new();

        for event in self.events {
            match event {
                SensorEvent::Location(fix) => fixes.push(fix),
                SensorEvent::Orientation(sample) => orientation.push(sample),
                SensorEvent::Proximity(reading) => proximity.push(reading),
            }
        }

        (
            ReplaySource::new(SensorKind::Location, fixes, interval),
            ReplaySource::new(SensorKind::Orientation, orientation, interval),
            ReplaySource::new(SensorKind::Proximity, proximity, interval),
        )
    }
}

/// Replays a fixed list of samples into the channel it is started with.
pub struct ReplaySource<T> {
    kind: SensorKind,
    samples: Vec<T>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
    finished_tx: watch::Sender<bool>,
}

impl<T> ReplaySource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(kind: SensorKind, samples: Vec<T>, interval: Duration) -> Self {
        let (finished_tx, _) = watch::channel(false);
        Self {
            kind,
            samples,
            interval,
            task: None,
            finished_tx,
        }
    }

    /// Watch that flips to `true` once every sample has been delivered.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished_tx.subscribe()
    }
}

impl<T> SensorSource<T> for ReplaySource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn start(&mut self, sink: mpsc::Sender<T>) -> Result<(), SensorError> {
        if self.task.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SensorError::Unavailable(self.kind))?;

        let samples = self.samples.clone();
        let interval = self.interval;
        let finished_tx = self.finished_tx.clone();
        let kind = self.kind;

        tracing::debug!("Replaying {} {} samples", samples.len(), kind);

        self.task = Some(runtime.spawn(async move {
            for sample in samples {
                if sink.send(sample).await.is_err() {
                    tracing::debug!("{} replay channel closed", kind);
                    break;
                }
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
            let _ = finished_tx.send(true);
        }));

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<T> Drop for ReplaySource<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Errors while loading a replay trace.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}
