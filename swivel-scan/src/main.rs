//! swivel-scan - Main entry point
//!
//! Runs the discovery loop against a replay radio, prints reports, and
//! administers the sighting database.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use swivel_common::config::{self, LoggingConfig, TomlConfig};
use swivel_common::db::init::recreate_database;
use swivel_common::db::Coordinate;
use swivel_common::EventBus;
use swivel_scan::db::SightingStore;
use swivel_scan::location::{FixedLocation, LocationProvider};
use swivel_scan::radio::ReplayRadio;
use swivel_scan::reports::{self, ReportSet};
use swivel_scan::{ScanEngine, ScanSettings};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for swivel-scan
#[derive(Parser, Debug)]
#[command(name = "swivel-scan")]
#[command(about = "Device discovery and identity-correlation engine")]
#[command(version)]
struct Args {
    /// Bootstrap config file (defaults to the platform config dir)
    #[arg(short, long, env = "SWIVEL_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for the database and logs
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Database file (defaults to <root>/swivel.db)
    #[arg(short, long, env = "SWIVEL_DATABASE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the discovery loop until interrupted
    Run {
        /// JSON-lines file of recorded discovery passes
        #[arg(long)]
        replay: PathBuf,

        /// Fixed latitude reported by the location provider
        #[arg(long, requires = "longitude", allow_hyphen_values = true)]
        latitude: Option<f64>,

        /// Fixed longitude reported by the location provider
        #[arg(long, requires = "latitude", allow_hyphen_values = true)]
        longitude: Option<f64>,

        /// Stop after this many passes
        #[arg(long)]
        passes: Option<u64>,
    },

    /// Print a report
    Report {
        #[arg(value_enum)]
        kind: ReportKind,

        /// Device key (required for the rssi report)
        #[arg(long)]
        device: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Create the database and schema if missing
    InitDb,

    /// Back up the database and start over with an empty one
    RecreateDb,

    /// Create a place by hand
    CreatePlace {
        #[arg(long, allow_hyphen_values = true)]
        latitude: f64,

        #[arg(long, allow_hyphen_values = true)]
        longitude: f64,

        /// Radius in meters (defaults to place_default_radius_m)
        #[arg(long)]
        radius: Option<f64>,

        #[arg(long)]
        name: Option<String>,
    },

    /// Assign a name to a place (empty name clears it)
    NamePlace { place_id: i64, name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReportKind {
    /// Every place with the devices seen there
    Places,
    /// Devices seen at more than one place
    MultiPlace,
    /// GATT signatures seen at more than one place
    Gatt,
    /// Signal strength history of one device
    Rssi,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = match &args.config {
        Some(path) => TomlConfig::load(path)?,
        None => TomlConfig::load_or_default()?,
    };
    init_tracing(&toml.logging)?;

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml);
    let db_path = config::resolve_database_path(args.database.as_deref(), &toml, &root_folder);
    info!("Database: {}", db_path.display());

    match args.command {
        Command::Run {
            replay,
            latitude,
            longitude,
            passes,
        } => {
            let location = match (latitude, longitude) {
                (Some(lat), Some(lon)) => FixedLocation::at(lat, lon),
                _ => FixedLocation::unavailable(),
            };
            run(&db_path, &replay, location, passes).await
        }
        Command::Report { kind, device, json } => report(&db_path, kind, device.as_deref(), json).await,
        Command::InitDb => {
            let store = SightingStore::open(&db_path)
                .await
                .context("Failed to initialize database")?;
            ScanSettings::load(store.pool()).await?;
            store.close().await;
            println!("Database ready at {}", db_path.display());
            Ok(())
        }
        Command::RecreateDb => {
            let (pool, backup) = recreate_database(&db_path)
                .await
                .context("Failed to recreate database")?;
            pool.close().await;
            match backup {
                Some(backup) => println!("Previous database saved as {}", backup.display()),
                None => println!("No previous database at {}", db_path.display()),
            }
            Ok(())
        }
        Command::CreatePlace {
            latitude,
            longitude,
            radius,
            name,
        } => {
            let store = SightingStore::open(&db_path).await?;
            let radius = match radius {
                Some(radius) => radius,
                None => ScanSettings::load(store.pool()).await?.place_default_radius_m,
            };
            let place = store
                .create_place(name.as_deref(), Coordinate::new(latitude, longitude), radius)
                .await?;
            store.close().await;
            println!("Created place {}: {}", place.place_id, place.display_name());
            Ok(())
        }
        Command::NamePlace { place_id, name } => {
            let store = SightingStore::open(&db_path).await?;
            let place = store.rename_place(place_id, Some(&name)).await?;
            store.close().await;
            println!("Place {} is now {}", place.place_id, place.display_name());
            Ok(())
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swivel_scan={0},swivel_common={0}", logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => registry.with(fmt::layer()).init(),
    }
    Ok(())
}

async fn run(db_path: &Path, replay: &Path, location: FixedLocation, passes: Option<u64>) -> Result<()> {
    let store = SightingStore::open(db_path)
        .await
        .context("Failed to open database")?;
    let settings = ScanSettings::load(store.pool()).await?;
    let stats = store.stats().await?;
    info!(
        "Store holds {} devices, {} places, {} sightings",
        stats.devices, stats.places, stats.sightings
    );

    let radio = Arc::new(ReplayRadio::from_file(replay)?);
    let location: Arc<dyn LocationProvider> = Arc::new(location);
    let bus = EventBus::new(settings.event_queue_capacity);

    let engine = ScanEngine::new(settings, store.clone(), bus, radio, location);
    engine.start().await?;

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = wait_for_passes(&engine, passes) => {
            info!("Completed {} passes", engine.passes());
        }
    }

    engine.stop().await?;
    info!("Scan engine stopped");

    let reports = ReportSet::generate(&store).await?;
    reports.log();
    store.close().await;
    Ok(())
}

/// Resolves when the engine stops by itself or has run `limit` passes
async fn wait_for_passes(engine: &ScanEngine, limit: Option<u64>) {
    loop {
        if !engine.is_running() {
            return;
        }
        if let Some(limit) = limit {
            if engine.passes() >= limit {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn report(db_path: &Path, kind: ReportKind, device: Option<&str>, json: bool) -> Result<()> {
    let store = SightingStore::open(db_path).await?;

    let result = match kind {
        ReportKind::Places => {
            let report = store.report_places_and_devices().await?;
            emit(json, &report, || reports::render_places(&report))
        }
        ReportKind::MultiPlace => {
            let report = store.report_multi_place_devices().await?;
            emit(json, &report, || reports::render_multi_place_devices(&report))
        }
        ReportKind::Gatt => {
            let groups = store.report_multi_place_by_gatt_signature().await?;
            let places = store.list_places().await?;
            emit(json, &groups, || {
                reports::render_gatt_groups(&groups, &reports::place_names(&places))
            })
        }
        ReportKind::Rssi => {
            let Some(device_key) = device else {
                bail!("--device is required for the rssi report");
            };
            let Some(device) = store.get_device(device_key).await? else {
                bail!("Unknown device {}", device_key);
            };
            let samples = store.rssi_history(device_key).await?;
            emit(json, &samples, || reports::render_rssi_history(&device, &samples))
        }
    };

    store.close().await;
    result
}

fn emit<T: Serialize>(json: bool, value: &T, render: impl FnOnce() -> Vec<String>) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        for line in render() {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
