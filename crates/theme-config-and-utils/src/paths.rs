//! File system paths for the theme server runtime.

use crate::{CoreError, CoreResult, SERVER_NAME};
use std::path::PathBuf;

/// Environment variable that overrides the runtime base directory.
pub const BASE_DIR_ENV: &str = "THEMESERVER_BASE_DIR";

/// Manages file system paths for the theme server.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.themeserver)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance.
    ///
    /// Uses `$THEMESERVER_BASE_DIR` when set, otherwise `~/.themeserver`.
    pub fn new() -> CoreResult<Self> {
        if let Some(dir) = std::env::var_os(BASE_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_base_dir(PathBuf::from(dir)));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".themeserver"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.themeserver).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.themeserver/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the server socket path (~/.themeserver/hbthemeserver.sock).
    pub fn socket_file(&self) -> PathBuf {
        self.base_dir.join(format!("{}.sock", SERVER_NAME))
    }

    /// Get the PID file path (~/.themeserver/hbthemeserver.pid).
    pub fn pid_file(&self) -> PathBuf {
        self.base_dir.join(format!("{}.pid", SERVER_NAME))
    }

    /// Lock file held by the running server (~/.themeserver/hbthemeserver.lock).
    pub fn instance_lock_file(&self) -> PathBuf {
        self.base_dir.join(format!("{}.lock", SERVER_NAME))
    }

    /// Lock file serializing server spawns between clients.
    pub fn spawn_lock_file(&self) -> PathBuf {
        self.base_dir.join("spawn.lock")
    }

    /// Persisted server settings (selected theme).
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("settings.json")
    }

    /// Get the logs directory (~/.themeserver/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Log file for one service (~/.themeserver/logs/<service>.jsonl).
    pub fn log_file(&self, service: &str) -> PathBuf {
        self.logs_dir().join(format!("{}.jsonl", service))
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-themeserver");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.socket_file(), base.join("hbthemeserver.sock"));
        assert_eq!(paths.pid_file(), base.join("hbthemeserver.pid"));
        assert_eq!(paths.spawn_lock_file(), base.join("spawn.lock"));
        assert_eq!(paths.instance_lock_file(), base.join("hbthemeserver.lock"));
        assert_eq!(paths.settings_file(), base.join("settings.json"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.log_file("client"), base.join("logs/client.jsonl"));
    }

    #[test]
    fn test_ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("themeserver");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());
        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.logs_dir().exists());
    }
}
