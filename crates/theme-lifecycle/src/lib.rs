//! Server lifecycle management for the theme server.
//!
//! Handles singleton enforcement, PID file management, the spawn lock that
//! keeps racing clients from starting two servers, and the `READY` handshake
//! a freshly spawned server prints once it can accept connections.

mod spawn;

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::Flock;
use thiserror::Error;

pub use spawn::{
    announce_ready, locate_server_binary, spawn_server, wait_for_ready, SpawnLock, READY_LINE,
    START_ARG,
};

/// Errors from lifecycle management.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Server is already running")]
    AlreadyRunning,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PID file error: {0}")]
    PidFile(String),
    #[error("Spawn lock error: {0}")]
    Lock(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Server binary not found")]
    BinaryNotFound,
    #[error("Server exited before signalling readiness")]
    ExitedBeforeReady,
}

/// Result of checking whether the server is already running.
#[derive(Debug, PartialEq, Eq)]
pub enum SingletonCheck {
    /// No server running, safe to start.
    Available,
    /// A stale socket was found and cleaned up.
    StaleSocketCleaned,
    /// Another server is already running.
    AlreadyRunning,
}

/// Exclusive lock held by a running server for its whole lifetime.
///
/// Taken before the socket check, so two servers starting at the same time
/// cannot both pass it. The lock file itself is never removed.
pub struct InstanceLock {
    _lock: Flock<File>,
}

impl InstanceLock {
    /// Take the lock, or fail with [`LifecycleError::AlreadyRunning`].
    pub fn try_acquire(path: &Path) -> Result<Self, LifecycleError> {
        match spawn::try_flock(path)? {
            Some(lock) => Ok(Self { _lock: lock }),
            None => Err(LifecycleError::AlreadyRunning),
        }
    }
}

/// Check if the server is already running by testing the socket file.
///
/// Returns `Available` if no socket exists, `StaleSocketCleaned` if a stale
/// socket was found and removed, or `AlreadyRunning` if a server responded.
pub fn check_singleton(socket_path: &Path) -> SingletonCheck {
    if !socket_path.exists() {
        return SingletonCheck::Available;
    }

    // Sync connect so callers don't need a runtime.
    match std::os::unix::net::UnixStream::connect(socket_path) {
        Ok(_stream) => SingletonCheck::AlreadyRunning,
        Err(_) => {
            let _ = std::fs::remove_file(socket_path);
            SingletonCheck::StaleSocketCleaned
        }
    }
}

fn remove_if_present(path: &Path) -> Result<(), LifecycleError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Record this process as the running server. The file is written next to
/// its final location and renamed into place, so readers never see a
/// partial PID.
pub fn write_pid_file(pid_path: &Path) -> Result<u32, LifecycleError> {
    let pid = std::process::id();
    let staging = pid_path.with_extension("pid.tmp");
    std::fs::write(&staging, format!("{pid}\n"))?;
    std::fs::rename(&staging, pid_path)?;
    Ok(pid)
}

/// PID recorded by a running (or crashed) server, if any.
pub fn read_pid_file(pid_path: &Path) -> Result<Option<u32>, LifecycleError> {
    let content = match std::fs::read_to_string(pid_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    content
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|e| LifecycleError::PidFile(format!("{}: {}", pid_path.display(), e)))
}

pub fn cleanup_pid_file(pid_path: &Path) -> Result<(), LifecycleError> {
    remove_if_present(pid_path)
}

pub fn cleanup_socket_file(socket_path: &Path) -> Result<(), LifecycleError> {
    remove_if_present(socket_path)
}

/// Files a server leaves behind, as seen by `hbthemeserver stop`/`status`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub pid: Option<u32>,
    pub socket_path: PathBuf,
    pub pid_path: PathBuf,
}

impl ServerInfo {
    pub fn new(socket_path: PathBuf, pid_path: PathBuf) -> Self {
        Self {
            pid: None,
            socket_path,
            pid_path,
        }
    }

    pub fn load_pid(&mut self) -> Result<(), LifecycleError> {
        self.pid = read_pid_file(&self.pid_path)?;
        Ok(())
    }

    /// True when something accepts connections on the socket.
    pub fn is_running(&self) -> bool {
        self.socket_path.exists()
            && std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok()
    }

    /// Remove the socket and the PID file. Both are attempted even if the
    /// first removal fails.
    pub fn cleanup(&self) -> Result<(), LifecycleError> {
        let socket = cleanup_socket_file(&self.socket_path);
        cleanup_pid_file(&self.pid_path)?;
        socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::os::unix::net::UnixListener;
    use tempfile::TempDir;

    fn tmp() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    fn bind_listener_or_skip(socket_path: &Path) -> Option<UnixListener> {
        match UnixListener::bind(socket_path) {
            Ok(listener) => Some(listener),
            Err(err) if err.kind() == ErrorKind::PermissionDenied => None,
            Err(err) => panic!("failed to bind unix listener at {:?}: {}", socket_path, err),
        }
    }

    // =========================================================================
    // SingletonCheck tests
    // =========================================================================

    #[test]
    fn singleton_available_when_no_socket() {
        let dir = tmp();
        let socket = dir.path().join("hbthemeserver.sock");
        assert_eq!(check_singleton(&socket), SingletonCheck::Available);
    }

    #[test]
    fn singleton_stale_when_socket_file_exists_but_no_listener() {
        let dir = tmp();
        let socket = dir.path().join("hbthemeserver.sock");
        std::fs::write(&socket, "stale").unwrap();
        assert_eq!(check_singleton(&socket), SingletonCheck::StaleSocketCleaned);
        assert!(!socket.exists());
    }

    #[test]
    fn singleton_already_running_when_listener_active() {
        let dir = tmp();
        let socket = dir.path().join("hbthemeserver.sock");
        let Some(_listener) = bind_listener_or_skip(&socket) else {
            return;
        };
        assert_eq!(check_singleton(&socket), SingletonCheck::AlreadyRunning);
    }

    #[test]
    fn instance_lock_admits_one_holder() {
        let dir = tmp();
        let path = dir.path().join("hbthemeserver.lock");

        let held = InstanceLock::try_acquire(&path).unwrap();
        assert!(matches!(
            InstanceLock::try_acquire(&path),
            Err(LifecycleError::AlreadyRunning)
        ));

        drop(held);
        assert!(InstanceLock::try_acquire(&path).is_ok());
        assert!(path.exists());
    }

    // =========================================================================
    // PID file tests
    // =========================================================================

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tmp();
        let pid_path = dir.path().join("hbthemeserver.pid");
        let written = write_pid_file(&pid_path).unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(written));
    }

    #[test]
    fn read_pid_file_missing_returns_none() {
        let dir = tmp();
        let pid_path = dir.path().join("nonexistent.pid");
        assert_eq!(read_pid_file(&pid_path).unwrap(), None);
    }

    #[test]
    fn read_pid_file_trims_whitespace() {
        let dir = tmp();
        let pid_path = dir.path().join("hbthemeserver.pid");
        std::fs::write(&pid_path, "  42  \n").unwrap();
        assert_eq!(read_pid_file(&pid_path).unwrap(), Some(42));
    }

    #[test]
    fn read_pid_file_invalid_content_returns_error() {
        let dir = tmp();
        let pid_path = dir.path().join("hbthemeserver.pid");
        std::fs::write(&pid_path, "not-a-number").unwrap();
        assert!(matches!(
            read_pid_file(&pid_path),
            Err(LifecycleError::PidFile(_))
        ));
    }

    #[test]
    fn cleanup_noop_when_missing() {
        let dir = tmp();
        cleanup_pid_file(&dir.path().join("missing.pid")).unwrap();
        cleanup_socket_file(&dir.path().join("missing.sock")).unwrap();
    }

    // =========================================================================
    // ServerInfo tests
    // =========================================================================

    #[test]
    fn server_info_cleanup_removes_both_files() {
        let dir = tmp();
        let socket = dir.path().join("hbthemeserver.sock");
        let pid = dir.path().join("hbthemeserver.pid");
        std::fs::write(&socket, "stub").unwrap();
        std::fs::write(&pid, "7").unwrap();

        let mut info = ServerInfo::new(socket.clone(), pid.clone());
        info.load_pid().unwrap();
        assert_eq!(info.pid, Some(7));

        info.cleanup().unwrap();
        assert!(!socket.exists());
        assert!(!pid.exists());
    }

    #[test]
    fn write_pid_file_leaves_no_staging_file() {
        let dir = tmp();
        let pid_path = dir.path().join("hbthemeserver.pid");
        write_pid_file(&pid_path).unwrap();
        assert!(!pid_path.with_extension("pid.tmp").exists());
        assert!(std::fs::read_to_string(&pid_path).unwrap().ends_with('\n'));
    }

    #[test]
    fn server_info_not_running_without_socket() {
        let dir = tmp();
        let info = ServerInfo::new(
            dir.path().join("hbthemeserver.sock"),
            dir.path().join("hbthemeserver.pid"),
        );
        assert!(!info.is_running());
    }
}
