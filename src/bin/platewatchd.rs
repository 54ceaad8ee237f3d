//! platewatchd - license plate watch daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file + PLATEWATCH_* environment)
//! 2. Opens the camera / watchlist / plate log database
//! 3. Starts one pipeline per stored camera with a source URI
//! 4. Logs per-camera health every few seconds
//! 5. Stops every pipeline on Ctrl-C, draining pending plate logs

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use plate_watch::config::PlateWatchConfig;
use plate_watch::{
    BackendFactory, BackendRegistry, Collaborators, LiveState, LogNotifier, SqliteStorage, Storage,
    Supervisor,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Continuous license plate recognition over camera streams")]
struct Args {
    /// JSON config file (overrides PLATEWATCH_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file and PLATEWATCH_DB_PATH).
    #[arg(long)]
    db_path: Option<String>,

    /// Inference backend name.
    #[arg(long)]
    backend: Option<String>,

    /// Register a camera with this source URI before starting, e.g. stub://front_gate.
    #[arg(long)]
    seed_camera_uri: Option<String>,

    /// Name for the seeded camera.
    #[arg(long, default_value = "seeded camera")]
    seed_camera_name: String,

    /// Owner of the seeded camera.
    #[arg(long, env = "PLATEWATCH_OWNER_ID")]
    owner_id: Option<i64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PlateWatchConfig::load_from(Some(path.as_path()))?,
        None => PlateWatchConfig::load()?,
    };
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if args.backend.is_some() {
        config.backend = args.backend;
    }

    let storage = Arc::new(SqliteStorage::open(&config.db_path)?);
    if let Some(uri) = &args.seed_camera_uri {
        let existing = storage
            .list_cameras()?
            .into_iter()
            .find(|camera| camera.source_uri.as_deref() == Some(uri.as_str()));
        match existing {
            Some(camera) => log::info!("camera {} already streams {}", camera.id, uri),
            None => {
                let id = storage.add_camera(&args.seed_camera_name, Some(uri), args.owner_id)?;
                log::info!("seeded camera {} ({}) -> {}", id, args.seed_camera_name, uri);
            }
        }
    }

    let registry = build_registry(&config);
    let backend = registry.select(config.backend.as_deref())?;
    log::info!(
        "platewatchd {} using backend '{}', db {}",
        env!("CARGO_PKG_VERSION"),
        backend.name(),
        config.db_path
    );

    let supervisor = Supervisor::new(
        Collaborators {
            storage: storage.clone(),
            sources: Arc::new(config.capture.source_opener()),
            backend,
            notifier: Arc::new(LogNotifier),
            live: Arc::new(LiveState::new()),
        },
        config.pipeline.clone(),
    );
    let started = supervisor.initialize_persistent()?;
    if started == 0 {
        log::warn!("no cameras with a source URI; use --seed-camera-uri to add one");
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("platewatchd running, Ctrl-C to stop");
    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => log_health(&supervisor, storage.as_ref()),
        }
    }

    log::info!("shutdown signal received, stopping pipelines...");
    supervisor.stop_all()?;
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn build_registry(_config: &PlateWatchConfig) -> BackendRegistry {
    BackendRegistry::with_builtin()
}

#[cfg(feature = "backend-tract")]
fn build_registry(config: &PlateWatchConfig) -> BackendRegistry {
    use plate_watch::detect::{TractBackendFactory, TractModelSettings};

    let mut registry = BackendRegistry::with_builtin();
    registry.register(TractBackendFactory::new(TractModelSettings {
        detector_model: config.models.detector.clone(),
        ocr_model: config.models.ocr.clone(),
        ..TractModelSettings::default()
    }));
    registry
}

fn log_health(supervisor: &Supervisor, storage: &dyn Storage) {
    for camera_id in supervisor.active_cameras() {
        let running = supervisor.is_running(camera_id);
        match supervisor.live().get(camera_id) {
            Some(snapshot) => log::info!(
                "camera {}: {} frame={} plates={} latency={}ms health={}{}",
                camera_id,
                snapshot.status,
                snapshot.frame_index,
                snapshot.detections.len(),
                snapshot.latency_ms,
                snapshot.health,
                if running { "" } else { " (pipeline ended)" }
            ),
            None => log::info!("camera {}: starting", camera_id),
        }
    }
    if let Ok(cameras) = storage.list_cameras() {
        let online = cameras
            .iter()
            .filter(|c| c.status == plate_watch::CameraStatus::Online)
            .count();
        log::debug!("{} of {} cameras online", online, cameras.len());
    }
}
