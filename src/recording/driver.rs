//! Single-consumer loop that feeds the recorder.
//!
//! Producers publish into bounded per-producer channels. One task owns the
//! [`RideRecorder`] and applies samples and lifecycle commands one at a time,
//! so session state is never touched concurrently. Callers talk to it through
//! a cloneable [`RideHandle`].

use tokio::sync::{mpsc, oneshot};

use crate::recording::recorder::RideRecorder;
use crate::recording::types::{LiveRideSummary, RecorderError, RideId, SessionState, StopOutcome};
use crate::sensors::types::SensorReceivers;

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 32;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        bike_id: String,
        reply: Reply<Result<RideId, RecorderError>>,
    },
    Pause {
        reply: Reply<Result<(), RecorderError>>,
    },
    Resume {
        reply: Reply<Result<(), RecorderError>>,
    },
    Calibrate {
        reply: Reply<Result<f64, RecorderError>>,
    },
    Stop {
        save: bool,
        reply: Reply<Result<StopOutcome, RecorderError>>,
    },
    RetrySave {
        reply: Reply<Result<StopOutcome, RecorderError>>,
    },
    Summary {
        reply: Reply<LiveRideSummary>,
    },
    Recover {
        reply: Reply<Result<Option<SessionState>, RecorderError>>,
    },
    DiscardRecovery {
        reply: Reply<Result<(), RecorderError>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Owns the recorder and the receiving ends of the sensor channels.
pub struct RideDriver {
    recorder: RideRecorder,
    receivers: SensorReceivers,
    commands: mpsc::Receiver<Command>,
}

impl RideDriver {
    /// Spawn the driver on the current runtime.
    pub fn spawn(recorder: RideRecorder, receivers: SensorReceivers) -> RideHandle {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let driver = Self {
            recorder,
            receivers,
            commands,
        };
        tokio::spawn(driver.run());
        RideHandle { commands: tx }
    }

    async fn run(self) {
        let RideDriver {
            mut recorder,
            mut receivers,
            mut commands,
        } = self;

        tracing::debug!("Ride driver started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    let Some(command) = command else {
                        recorder.shutdown();
                        break;
                    };

                    // Samples already queued belong before the command.
                    flush_queued(&mut recorder, &mut receivers);

                    if !handle_command(&mut recorder, command).await {
                        break;
                    }

                    // Whatever a stopped producer left behind must not reach
                    // the next ride.
                    flush_queued(&mut recorder, &mut receivers);
                }
                Some(fix) = receivers.location.recv() => {
                    recorder.record_coordinate(fix);
                }
                Some(sample) = receivers.orientation.recv() => {
                    recorder.record_orientation(sample);
                }
                Some(reading) = receivers.proximity.recv() => {
                    recorder.record_proximity(reading);
                }
            }
        }

        tracing::debug!("Ride driver stopped");
    }
}

/// Apply queued samples to a live ride. Outside one they are stale and dropped.
fn flush_queued(recorder: &mut RideRecorder, receivers: &mut SensorReceivers) {
    let queued = receivers.drain_pending();
    if recorder.state() == SessionState::Recording {
        for event in queued {
            recorder.apply_event(event);
        }
    } else if !queued.is_empty() {
        tracing::debug!(
            "Discarded {} samples queued while {}",
            queued.len(),
            recorder.state()
        );
    }
}

/// Apply one command. Returns `false` once the driver should exit.
async fn handle_command(recorder: &mut RideRecorder, command: Command) -> bool {
    // A dropped reply receiver just means the caller stopped waiting.
    match command {
        Command::Start { bike_id, reply } => {
            let _ = reply.send(recorder.start(&bike_id));
        }
        Command::Pause { reply } => {
            let _ = reply.send(recorder.pause());
        }
        Command::Resume { reply } => {
            let _ = reply.send(recorder.resume());
        }
        Command::Calibrate { reply } => {
            let _ = reply.send(recorder.calibrate());
        }
        Command::Stop { save, reply } => {
            let _ = reply.send(recorder.stop(save).await);
        }
        Command::RetrySave { reply } => {
            let _ = reply.send(recorder.retry_save().await);
        }
        Command::Summary { reply } => {
            let _ = reply.send(recorder.live_summary());
        }
        Command::Recover { reply } => {
            let _ = reply.send(recorder.recover());
        }
        Command::DiscardRecovery { reply } => {
            let _ = reply.send(recorder.discard_recovery());
        }
        Command::Shutdown { reply } => {
            recorder.shutdown();
            let _ = reply.send(());
            return false;
        }
    }
    true
}

/// Handle for controlling a running [`RideDriver`].
#[derive(Clone)]
pub struct RideHandle {
    commands: mpsc::Sender<Command>,
}

impl RideHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, RecorderError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| RecorderError::DriverClosed)?;
        rx.await.map_err(|_| RecorderError::DriverClosed)
    }

    pub async fn start(&self, bike_id: impl Into<String>) -> Result<RideId, RecorderError> {
        let bike_id = bike_id.into();
        self.request(|reply| Command::Start { bike_id, reply })
            .await?
    }

    pub async fn pause(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    pub async fn calibrate(&self) -> Result<f64, RecorderError> {
        self.request(|reply| Command::Calibrate { reply }).await?
    }

    /// Stop the ride after applying every sample already queued.
    pub async fn stop(&self, save: bool) -> Result<StopOutcome, RecorderError> {
        self.request(|reply| Command::Stop { save, reply }).await?
    }

    pub async fn retry_save(&self) -> Result<StopOutcome, RecorderError> {
        self.request(|reply| Command::RetrySave { reply }).await?
    }

    pub async fn live_summary(&self) -> Result<LiveRideSummary, RecorderError> {
        self.request(|reply| Command::Summary { reply }).await
    }

    pub async fn recover(&self) -> Result<Option<SessionState>, RecorderError> {
        self.request(|reply| Command::Recover { reply }).await?
    }

    pub async fn discard_recovery(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::DiscardRecovery { reply })
            .await?
    }

    /// Stop the producers and end the driver task.
    pub async fn shutdown(&self) -> Result<(), RecorderError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Whether the driver task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
