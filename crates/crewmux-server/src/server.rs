use std::sync::Arc;

use tokio::net::UnixListener;
use tracing::{error, info, warn};

use libcrewmux::{
    FsScheduleStore, RegistryConfig, ScheduleEngine, SessionDirectory, SessionRegistry, TaskEngine,
    TaskEngineConfig, TaskTracker,
};

use crate::config::ServerConfig;
use crate::connection;

/// Shared handles the connection handlers dispatch against.
pub struct Daemon {
    pub registry: Arc<SessionRegistry>,
    pub tasks: Arc<TaskEngine>,
    pub schedules: Arc<ScheduleEngine>,
}

pub type SharedDaemon = Arc<Daemon>;

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    // Clean up stale socket
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pid_path = ServerConfig::pid_file_path();
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_path, std::process::id().to_string())?;

    let registry = SessionRegistry::new(RegistryConfig {
        default_probe_timeout: config.default_probe_timeout(),
        ..RegistryConfig::default()
    });

    let directory: Arc<dyn SessionDirectory> = registry.clone();
    let tracker = TaskTracker::load(config.tracker_path())?;
    let tasks = Arc::new(TaskEngine::new(
        Arc::new(libcrewmux::FsTaskStore),
        Arc::clone(&directory),
        tracker,
        TaskEngineConfig {
            idle_grace: config.idle_grace(),
        },
    ));

    let schedule_store = FsScheduleStore::load(config.schedule_path())?;
    let schedules = ScheduleEngine::new(Arc::clone(&directory), Box::new(schedule_store));
    let rearmed = schedules.rearm_persisted().await;
    info!(rearmed, "schedule engine ready");

    let daemon: SharedDaemon = Arc::new(Daemon {
        registry,
        tasks,
        schedules,
    });

    // Background recovery passes, serialized inside the engine.
    let recovery_daemon = Arc::clone(&daemon);
    let recovery_interval = config.recovery_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(recovery_interval);
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            let report = recovery_daemon.tasks.recover_stalled().await;
            if !report.errors.is_empty() {
                warn!(errors = report.errors.len(), "recovery pass had errors");
            }
        }
    });

    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), pid = std::process::id(), "crewmux server started");

    // Handle shutdown signals
    let socket_path = config.socket_path.clone();
    let pid_path_clone = pid_path.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutting down...");
        let _ = std::fs::remove_file(&socket_path);
        let _ = std::fs::remove_file(&pid_path_clone);
        std::process::exit(0);
    });

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let daemon = Arc::clone(&daemon);
                tokio::spawn(async move {
                    connection::handle_client(stream, daemon).await;
                });
            }
            Err(e) => {
                error!("accept error: {e}");
            }
        }
    }
}
