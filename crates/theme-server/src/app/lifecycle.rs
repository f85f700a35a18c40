//! Server lifecycle management (stop, status).

use theme_client::{ClientOptions, ThemeClient};
use theme_config_and_utils::{Config, Paths};
use theme_lifecycle::{read_pid_file, ServerInfo};

const STOP_ATTEMPTS: u32 = 5;

fn control_client(paths: &Paths, config: &Config) -> ThemeClient {
    let mut options = ClientOptions::new(paths.clone(), config.clone());
    options.spawn_server = false;
    ThemeClient::new(options)
}

/// Clients that just exited may not have been reaped by the server yet.
async fn request_stop(client: &ThemeClient) -> bool {
    for attempt in 0..STOP_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        if client.server_stop().await {
            return true;
        }
    }
    false
}

/// Stop the server.
pub async fn stop_server(paths: &Paths, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let socket_path = paths.socket_file();
    let pid_path = paths.pid_file();

    if !socket_path.exists() {
        println!("Theme server is not running (socket not found)");
        // Clean up stale PID file if it exists
        if pid_path.exists() {
            let _ = std::fs::remove_file(&pid_path);
        }
        return Ok(());
    }

    // Try graceful shutdown first
    let client = control_client(paths, config);
    if !client.reconnect().await {
        println!("Failed to connect to theme server");
    } else if request_stop(&client).await {
        println!("Theme server shutdown initiated");
    } else {
        println!("Shutdown refused: other clients are connected");
    }
    client.disconnect();

    // Wait for the server to stop (up to 3 seconds)
    for _ in 0..30 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        if !socket_path.exists() {
            println!("Theme server stopped");
            return Ok(());
        }
    }

    // If still running, try to force kill using PID
    if let Ok(Some(pid)) = read_pid_file(&pid_path) {
        println!(
            "Theme server did not stop gracefully, sending SIGKILL to PID {}",
            pid
        );
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        let _ = ServerInfo::new(socket_path, pid_path).cleanup();
        println!("Theme server killed");
        return Ok(());
    }

    // Last resort: clean up socket file
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
        println!("Cleaned up stale socket file");
    }

    Ok(())
}

/// Check server status.
pub async fn check_status(paths: &Paths, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut info = ServerInfo::new(paths.socket_file(), paths.pid_file());

    if !info.socket_path.exists() {
        println!("Theme server is not running (socket not found)");
        return Ok(());
    }
    if !info.is_running() {
        println!("Theme server is not running (stale socket)");
        return Ok(());
    }

    let client = control_client(paths, config);
    if !client.reconnect().await {
        println!("Failed to connect to theme server");
        println!("Theme server may not be running or socket may be stale");
        return Ok(());
    }

    match client.server_info() {
        Some(handshake) => {
            let _ = info.load_pid();
            let free = client.free_shared_memory().await;
            let used = client.allocated_shared_memory().await;

            println!("Theme server is running");
            println!("  Theme:      {}", handshake.theme);
            println!("  Protocol:   {}", handshake.protocol_version);
            println!(
                "  Arena:      {} ({} bytes, generation {})",
                handshake.arena_name, handshake.arena_size, handshake.generation
            );
            if let (Some(free), Some(used)) = (free, used) {
                println!("  Shared:     {} bytes used, {} bytes free", used, free);
            }
            if let Some(pid) = info.pid {
                println!("  PID:        {}", pid);
            }
            println!("  Socket:     {}", info.socket_path.display());
        }
        None => println!("Theme server is running (no details available)"),
    }
    client.disconnect();

    Ok(())
}
