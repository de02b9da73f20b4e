// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup and shutdown.

use std::fs::File;
use std::io::Write;
use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use doorman_core::config::ConfigError;
use doorman_core::emitter::{self, EventReceiver};
use doorman_core::storage::SnapshotError;
use doorman_core::{
    Catalog, Coordinator, CoordinatorError, DoorId, DoormanConfig, ResourceManager,
    SnapshotStore, StorableState,
};
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Doors waiting for queue processing after a release
const QUEUE_PUMP_CAPACITY: usize = 256;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Configuration and catalogue file
    pub config_path: PathBuf,
    pub settings: DoormanConfig,
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Path to the request socket
    pub socket_path: PathBuf,
    pub snapshot_path: PathBuf,
}

impl Config {
    /// Read and validate the configuration file
    pub fn load(config_path: &Path) -> Result<Self, LifecycleError> {
        let canonical = config_path
            .canonicalize()
            .map_err(|e| LifecycleError::ConfigNotFound(config_path.to_path_buf(), e))?;
        let settings = DoormanConfig::load(&canonical)?;
        Ok(Self::with_state_dir(canonical, settings, state_dir()?))
    }

    pub fn with_state_dir(
        config_path: PathBuf,
        settings: DoormanConfig,
        state_dir: PathBuf,
    ) -> Self {
        let snapshot_path = DoormanConfig::resolve(&config_path, &settings.storage.snapshot_path);
        Self {
            lock_path: state_dir.join("doormand.pid"),
            log_path: state_dir.join("doormand.log"),
            socket_path: state_dir.join("doormand.sock"),
            snapshot_path,
            config_path,
            settings,
            state_dir,
        }
    }
}

/// Daemon state during operation
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub coordinator: Arc<Coordinator>,
    pub catalog: Arc<Catalog>,
    pub store: SnapshotStore,
    /// Bound at startup, taken by the server
    listener: Option<StdUnixListener>,
    /// Taken by the event drain worker
    pub events: Option<EventReceiver>,
    /// Taken by the queue pump worker
    pub queue_pump: Option<mpsc::Receiver<DoorId>>,
    /// When daemon started
    pub start_time: Instant,
}

impl DaemonState {
    /// Hand the request socket to the async runtime. Must run inside it.
    pub fn take_listener(&mut self) -> Result<UnixListener, LifecycleError> {
        let listener = self.listener.take().ok_or(LifecycleError::ListenerTaken)?;
        Ok(UnixListener::from_std(listener)?)
    }

    /// Write a final snapshot and remove the PID file
    pub fn shutdown(&mut self) {
        info!("Shutting down daemon...");

        let state = StorableState::capture(&self.coordinator);
        match self.store.save(&state) {
            Ok(()) => info!(
                path = %self.store.path().display(),
                instances = state.instances.len(),
                queued = state.queued(),
                "final snapshot written"
            ),
            Err(e) => error!(error = %e, "failed to write final snapshot"),
        }

        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!("Failed to remove socket: {}", e);
            }
        }

        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("Failed to remove PID file: {}", e);
            }
        }

        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            "Daemon shutdown complete"
        );
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Config file not found at {0}: {1}")]
    ConfigNotFound(PathBuf, std::io::Error),

    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket {0}: {1}")]
    BindFailed(PathBuf, #[source] std::io::Error),

    #[error("Request socket already taken")]
    ListenerTaken,

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Catalog rejected: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Lock first, a second daemon must not touch anything
    let mut lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    match startup_inner(config, &mut lock_file) {
        Ok(parts) => Ok(DaemonState {
            config: config.clone(),
            lock_file,
            coordinator: parts.coordinator,
            catalog: parts.catalog,
            store: parts.store,
            listener: Some(parts.listener),
            events: Some(parts.events),
            queue_pump: Some(parts.queue_pump),
            start_time: Instant::now(),
        }),
        Err(e) => {
            cleanup_on_failure(config);
            Err(e)
        }
    }
}

struct Parts {
    coordinator: Arc<Coordinator>,
    catalog: Arc<Catalog>,
    store: SnapshotStore,
    listener: StdUnixListener,
    events: EventReceiver,
    queue_pump: mpsc::Receiver<DoorId>,
}

/// Startup after the lock is held - cleanup_on_failure called if this fails
fn startup_inner(config: &Config, lock_file: &mut File) -> Result<Parts, LifecycleError> {
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    let settings = &config.settings;
    let store = SnapshotStore::new(&config.snapshot_path);
    match store.load() {
        Ok(Some(previous)) => report_lost(&previous),
        Ok(None) => {}
        // A bad snapshot never blocks startup, state is cold-started anyway
        Err(e) => warn!(
            path = %config.snapshot_path.display(),
            error = %e,
            "ignoring unreadable snapshot"
        ),
    }

    let (events, event_rx) = emitter::channel(settings.events.capacity);
    let resources = Arc::new(ResourceManager::new(settings.resources.clone(), events.clone()));
    let (pump_tx, pump_rx) = mpsc::channel(QUEUE_PUMP_CAPACITY);
    let coordinator = Coordinator::new(
        settings.coordinator.clone(),
        settings.queue.clone(),
        resources,
        events,
        doorman_core::SystemClock,
    )
    .with_queue_pump(pump_tx);

    let catalog = Arc::new(Catalog::from_config(settings));
    let doors = coordinator.register_doors_from(catalog.as_ref())?;
    let nodes = coordinator.register_nodes_from(catalog.as_ref())?;

    // We hold the lock, so any socket file left behind is stale
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = StdUnixListener::bind(&config.socket_path)
        .map_err(|e| LifecycleError::BindFailed(config.socket_path.clone(), e))?;
    listener.set_nonblocking(true)?;

    info!(
        config = %config.config_path.display(),
        socket = %config.socket_path.display(),
        doors,
        nodes,
        "Daemon started"
    );

    Ok(Parts {
        coordinator: Arc::new(coordinator),
        catalog,
        store,
        listener,
        events: event_rx,
        queue_pump: pump_rx,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.socket_path.exists() {
        let _ = std::fs::remove_file(&config.socket_path);
    }
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

/// Log what the previous run left behind. Nothing is restored: the door
/// processes it tracked ended with it.
fn report_lost(previous: &StorableState) {
    if previous.instances.is_empty() && previous.queued() == 0 {
        return;
    }
    warn!(
        written_at = %previous.written_at,
        instances = previous.instances.len(),
        queued = previous.queued(),
        "Found state from previous run, starting cold"
    );
    for instance in &previous.instances {
        warn!(
            "  - {} ({} on node {}, user {})",
            instance.id, instance.door_id, instance.node_id, instance.user_id
        );
    }
}

/// Get the state directory for doormand
fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("DOORMAN_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("doorman"));
    }

    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/doorman"))
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
