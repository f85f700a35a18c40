//! Server initialization.

use std::sync::Arc;

use theme_config_and_utils::{Config, Paths};
use theme_ipc::IpcServer;
use theme_lifecycle::{
    announce_ready, check_singleton, cleanup_pid_file, cleanup_socket_file, write_pid_file,
    InstanceLock, LifecycleError, SingletonCheck,
};
use theme_server::{ServerState, ThemeDispatcher};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

/// Run the server until a stop request or a termination signal.
pub async fn run_server(config: Config, paths: Paths) -> Result<(), Box<dyn std::error::Error>> {
    paths.ensure_dirs()?;

    // Held until this function returns, across the socket check, arena
    // creation and bind.
    let instance = match InstanceLock::try_acquire(&paths.instance_lock_file()) {
        Ok(lock) => lock,
        Err(LifecycleError::AlreadyRunning) => already_running(),
        Err(e) => return Err(e.into()),
    };

    let socket_path = paths.socket_file();
    match check_singleton(&socket_path) {
        SingletonCheck::AlreadyRunning => already_running(),
        SingletonCheck::StaleSocketCleaned => warn!("Removed stale socket file"),
        SingletonCheck::Available => {}
    }

    let pid = write_pid_file(&paths.pid_file())?;
    info!(
        pid,
        arena = %config.arena_name,
        arena_size = config.arena_size,
        diagnostics = config.diagnostics,
        "Starting theme server"
    );

    let state = match ServerState::open(&config, &paths) {
        Ok(state) => state,
        Err(e) => {
            let _ = cleanup_pid_file(&paths.pid_file());
            return Err(e.into());
        }
    };
    let dispatcher = Arc::new(ThemeDispatcher::new(state));
    let stop = dispatcher.stop_signal();

    let ipc_server = IpcServer::new(&socket_path, dispatcher).with_diagnostics(config.diagnostics);
    let listener = ipc_server.bind()?;
    announce_ready()?;
    info!(socket = %socket_path.display(), "Theme server ready");

    let shutdown = ipc_server.shutdown_sender();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            _ = sigterm.recv() => info!("Terminated"),
            _ = stop.notified() => info!("Stopping on client request"),
        }
        let _ = shutdown.send(());
    });

    let server_result = ipc_server.serve(listener).await;

    // Cleanup
    let _ = cleanup_pid_file(&paths.pid_file());
    let _ = cleanup_socket_file(&socket_path);
    drop(instance);

    info!("Theme server stopped");

    server_result.map_err(|e| e.into())
}

fn already_running() -> ! {
    eprintln!("Error: hbthemeserver is already running. Use 'hbthemeserver stop' to stop it first.");
    std::process::exit(1);
}
