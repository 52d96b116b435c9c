//! RideTrack - Ride Recording and Telemetry Engine
//!
//! Command line entry point: replay recorded sensor traces through the
//! recorder, list stored rides and manage crash recovery data.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use ridetrack::persistence::{HttpRideBackend, LocalRideStore, RidePersistence, SessionStore};
use ridetrack::recording::{RecorderConfig, RideDriver, RideRecorder, SessionState, StopOutcome};
use ridetrack::sensors::{
    sensor_channels, CoordinateSample, ReplaySource, ReplayTrace, SensorKind, SensorSet,
};
use ridetrack::storage::config::{
    get_config_path, load_config, load_config_from, save_config, AppConfig,
};
use ridetrack::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "ridetrack", version, about = "Ride recording and telemetry engine")]
struct Cli {
    /// Path to config TOML (defaults to the platform data directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ride database (defaults to rides.db in the data directory)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Signed-in user, overriding the config
    #[arg(long, value_name = "UUID")]
    user: Option<Uuid>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record a ride by replaying a JSON sensor trace
    Replay {
        /// Trace file: {"events": [{"kind": "location", ...}, ...]}
        trace: PathBuf,

        /// Bike the ride belongs to
        #[arg(long)]
        bike: String,

        /// Delay between replayed samples, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Calibrate against the first orientation reading
        #[arg(long)]
        calibrate: bool,

        /// Throw the ride away instead of saving it
        #[arg(long)]
        discard: bool,
    },
    /// List stored rides
    Rides {
        /// Only rides for this bike
        #[arg(long)]
        bike: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Inspect or resolve an autosaved session
    Recover {
        /// Save the recovered ride
        #[arg(long, conflicts_with = "discard")]
        save: bool,

        /// Drop the autosaved session
        #[arg(long)]
        discard: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RideTrack v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("loading configuration")?;

    // First run: write the defaults so they can be edited.
    if cli.config.is_none() && !get_config_path().exists() {
        if let Err(e) = save_config(&config) {
            tracing::warn!("Could not write default config: {}", e);
        }
    }

    if cli.user.is_some() {
        config.user_id = cli.user;
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());
    let database = Database::open(&db_path)
        .with_context(|| format!("opening ride database {}", db_path.display()))?;
    let store = LocalRideStore::new(database, config.user_id);

    match cli.cmd {
        Commands::Replay {
            trace,
            bike,
            interval_ms,
            calibrate,
            discard,
        } => {
            let trace = ReplayTrace::load(&trace)
                .with_context(|| format!("loading trace {}", trace.display()))?;
            replay(&config, store, trace, &bike, interval_ms, calibrate, discard).await
        }
        Commands::Rides { bike, limit } => list_rides(&store, bike.as_deref(), limit),
        Commands::Recover { save, discard } => recover(&config, store, save, discard).await,
    }
}

/// Remote backend if one is configured, otherwise the local database.
fn ride_persistence(config: &AppConfig, store: &LocalRideStore) -> Result<Arc<dyn RidePersistence>> {
    match config.backend_config() {
        Some(backend) => {
            tracing::info!("Saving rides to {}", backend.base_url);
            Ok(Arc::new(HttpRideBackend::new(backend)?))
        }
        None => Ok(Arc::new(store.clone())),
    }
}

async fn replay(
    config: &AppConfig,
    store: LocalRideStore,
    trace: ReplayTrace,
    bike: &str,
    interval_ms: u64,
    calibrate: bool,
    discard: bool,
) -> Result<()> {
    println!(
        "Replaying {} fixes, {} orientation and {} proximity readings",
        trace.count(SensorKind::Location),
        trace.count(SensorKind::Orientation),
        trace.count(SensorKind::Proximity)
    );

    let (location, orientation, proximity) =
        trace.into_sources(Duration::from_millis(interval_ms));
    let mut location_done = location.finished();
    let orientation_done = orientation.finished();

    let mut sensors = SensorSet::location_only(Box::new(location));
    if config.sensors.orientation_enabled {
        sensors = sensors.with_orientation(Box::new(orientation));
    }
    if config.sensors.proximity_enabled {
        sensors = sensors.with_proximity(Box::new(proximity));
    }

    let (senders, receivers) = sensor_channels(config.sensors.channel_capacity);
    let persistence = ride_persistence(config, &store)?;
    let recorder = RideRecorder::new(
        RecorderConfig::from(&config.recording),
        sensors,
        senders,
        persistence,
    )
    .with_session_store(Arc::new(store) as Arc<dyn SessionStore>);
    let handle = RideDriver::spawn(recorder, receivers);

    let ride_id = handle.start(bike).await?;
    println!("Recording ride {}", ride_id);

    if calibrate && config.sensors.orientation_enabled {
        // Wait for at least one orientation reading to reach the driver.
        while handle.calibrate().await.is_err() {
            if *orientation_done.borrow() {
                tracing::warn!("Trace has no orientation reading to calibrate against");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    while !*location_done.borrow() {
        if location_done.changed().await.is_err() {
            break;
        }
    }

    let summary = handle.live_summary().await?;
    let outcome = handle.stop(!discard).await;
    handle.shutdown().await?;

    match outcome {
        Ok(StopOutcome::Saved(id)) => {
            println!("Saved ride {}", id);
            println!("  distance:  {:.2} km", summary.distance_km);
            println!("  duration:  {} s", summary.elapsed_seconds);
            println!(
                "  max lean:  {:.1}° left / {:.1}° right",
                summary.max_lean_left, summary.max_lean_right
            );
            if let Some(speed) = summary.max_speed_mps {
                println!("  max speed: {:.1} km/h", speed * 3.6);
            }
            Ok(())
        }
        Ok(StopOutcome::Discarded) => {
            println!("Discarded ride {}", ride_id);
            Ok(())
        }
        Err(e) => bail!("ride {} kept for retry: {}", ride_id, e),
    }
}

fn list_rides(store: &LocalRideStore, bike: Option<&str>, limit: u32) -> Result<()> {
    let rides = store.list_rides(bike, Some(limit))?;
    let total = store.count_rides(bike)?;
    if rides.is_empty() {
        println!("No rides stored");
        return Ok(());
    }

    let shown = rides.len();
    for ride in rides {
        println!(
            "{}  {}  {:<12} {:>8.2} km  {:>6} s  lean {:.0}°/{:.0}°",
            ride.id,
            ride.started_at.format("%Y-%m-%d %H:%M"),
            ride.bike_id,
            ride.distance_km,
            ride.duration_seconds,
            ride.max_lean_left,
            ride.max_lean_right
        );
    }
    println!("{} of {} rides", shown, total);
    Ok(())
}

async fn recover(config: &AppConfig, store: LocalRideStore, save: bool, discard: bool) -> Result<()> {
    let Some(persisted) = store.load_persisted_session()? else {
        println!("No autosaved session");
        return Ok(());
    };

    if let Some(session) = &persisted.session {
        println!(
            "Autosaved ride {} on bike {}: {} ({} coordinates, {:.2} km), saved {}",
            session.ride_id,
            session.bike_id,
            persisted.state,
            session.track.len(),
            session.distance_km(),
            persisted.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if !save && !discard {
        return Ok(());
    }

    // No live producers here: the ride is finished from its autosaved data.
    let idle_location = ReplaySource::<CoordinateSample>::new(
        SensorKind::Location,
        Vec::new(),
        Duration::ZERO,
    );
    let (senders, _receivers) = sensor_channels(1);
    let mut recorder = RideRecorder::new(
        RecorderConfig::from(&config.recording),
        SensorSet::location_only(Box::new(idle_location)),
        senders,
        ride_persistence(config, &store)?,
    )
    .with_session_store(Arc::new(store) as Arc<dyn SessionStore>);

    if discard {
        recorder.discard_recovery()?;
        println!("Discarded autosaved session");
        return Ok(());
    }

    match recorder.recover()? {
        Some(SessionState::SaveFailed) => match recorder.retry_save().await? {
            StopOutcome::Saved(id) => println!("Saved ride {}", id),
            StopOutcome::Discarded => println!("Discarded ride"),
        },
        Some(_) => match recorder.stop(true).await? {
            StopOutcome::Saved(id) => println!("Saved ride {}", id),
            StopOutcome::Discarded => println!("Discarded ride"),
        },
        None => println!("Nothing to recover"),
    }
    Ok(())
}
