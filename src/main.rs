//! Adaptive quality daemon.
//!
//! Runs a quality controller against the host's capabilities and exposes it
//! over a Unix socket, so render processes can report frames and debug
//! panels can read or force the quality level.

use adaptive_quality::capability::SystemProbe;
use adaptive_quality::config::SettingsManager;
use adaptive_quality::controller::QualityController;
use adaptive_quality::environment::ReducedMotionFlag;
use adaptive_quality::error::{IpcError, QualityError};
use adaptive_quality::ipc_server::DaemonState;
use adaptive_quality::logging;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown timeout in seconds
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

/// Delay before rebinding the IPC socket after a failure
const IPC_RETRY_SECS: u64 = 5;

/// Overrides the IPC socket location
const SOCKET_PATH_ENV: &str = "ADAPTIVE_QUALITY_SOCKET";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("Adaptive quality daemon starting...");

    let result = run_daemon().await;

    match &result {
        Ok(()) => info!("Adaptive quality daemon shut down gracefully"),
        Err(e) => error!("Adaptive quality daemon error: {}", e),
    }

    result.map_err(Into::into)
}

async fn run_daemon() -> Result<(), QualityError> {
    let settings_path = SettingsManager::default_path();
    let settings = Arc::new(SettingsManager::load_or_default(&settings_path)?);
    info!("Configuration loaded from {:?}", settings_path);

    let reduced_motion = ReducedMotionFlag::default();
    let controller = Arc::new(
        QualityController::builder(settings.get())
            .motion_preference(reduced_motion.clone())
            .build(&SystemProbe::new()),
    );

    let _budget_log = controller.subscribe(|level, config| {
        info!(
            level = %level,
            render_scale = config.render_scale,
            shadow_map_size = config.shadow_map_size,
            max_particles = config.max_particles,
            max_lights = config.max_lights,
            "Rendering budget updated"
        );
    });

    if settings.get().enabled {
        controller.start();
    } else {
        info!("Evaluation disabled in configuration, waiting for SetEnabled");
    }

    let daemon_state = Arc::new(DaemonState::new(
        Arc::clone(&controller),
        reduced_motion,
        Arc::clone(&settings),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(shutdown_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let ipc_state = Arc::clone(&daemon_state);
    let ipc_shutdown_rx = shutdown_rx.clone();
    let ipc_handle = tokio::spawn(async move { run_ipc_server(ipc_state, ipc_shutdown_rx).await });

    let watch_rx = controller.watch();
    let emergency_shutdown_rx = shutdown_rx.clone();
    let emergency_handle =
        tokio::spawn(async move { report_emergencies(watch_rx, emergency_shutdown_rx).await });

    info!("Adaptive quality daemon initialized and running");

    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();

    info!("Shutdown signal received, stopping tasks...");
    controller.shutdown();

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    if tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(ipc_handle, emergency_handle);
    })
    .await
    .is_err()
    {
        warn!("Tasks did not stop within {}s", SHUTDOWN_TIMEOUT_SECS);
    }

    info!("All tasks stopped");
    Ok(())
}

/// Handles SIGTERM and SIGINT.
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}

fn socket_path() -> PathBuf {
    std::env::var_os(SOCKET_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(adaptive_quality::ipc_server::DEFAULT_SOCKET_PATH))
}

/// Run the IPC server, rebinding after failures until shutdown.
async fn run_ipc_server(state: Arc<DaemonState>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
            result = run_ipc_server_inner(Arc::clone(&state)) => {
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!("IPC server error: {}, restarting in {} seconds", e, IPC_RETRY_SECS);
                        tokio::time::sleep(Duration::from_secs(IPC_RETRY_SECS)).await;
                    }
                }
            }
        }
    }
}

#[cfg(unix)]
async fn run_ipc_server_inner(state: Arc<DaemonState>) -> Result<(), IpcError> {
    let server = adaptive_quality::ipc_server::IpcServer::new(&socket_path())?;
    info!("IPC server listening on {:?}", server.socket_path());
    server.run(state).await
}

#[cfg(not(unix))]
async fn run_ipc_server_inner(_state: Arc<DaemonState>) -> Result<(), IpcError> {
    warn!(
        "IPC server not available on this platform, {:?} unused",
        socket_path()
    );
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

/// Warn once per emergency episode.
async fn report_emergencies(
    mut states: watch::Receiver<adaptive_quality::controller::QualityState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut in_emergency = false;
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                if state.is_emergency && !in_emergency {
                    warn!(
                        instant_fps = state.fps.instant_fps,
                        average_fps = state.fps.average_fps,
                        "Frame rate collapsed, emergency quality engaged"
                    );
                }
                in_emergency = state.is_emergency;
            }
        }
    }
}
