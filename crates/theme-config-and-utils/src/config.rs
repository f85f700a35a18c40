//! Configuration management for the theme server and its clients.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known name of the server endpoint and executable.
pub const SERVER_NAME: &str = "hbthemeserver";

/// Default name of the shared memory arena.
pub const ARENA_NAME: &str = "themeserver_chunk";

/// Environment variable that redirects the theme root search path.
pub const THEMES_DIR_ENV: &str = "HB_THEMES_DIR";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default arena size (13 MiB).
pub const DEFAULT_ARENA_SIZE: usize = 13 * 1024 * 1024;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 500;

/// Default time to wait for a spawned server to report readiness.
pub const DEFAULT_START_TIMEOUT_MS: u64 = 5_000;

/// Default number of concurrently outstanding calls on the call-based binding.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 4;

/// Theme used when nothing has been selected yet.
pub const DEFAULT_THEME: &str = "hbdefault";

/// Install directory of the server binary, fixed at build time.
const COMPILED_BIN_DIR: Option<&str> = option_env!("THEMESERVER_BIN_DIR");

/// Default themes directory, fixed at build time.
const COMPILED_THEMES_DIR: Option<&str> = option_env!("THEMESERVER_DEFAULT_THEMES_DIR");

/// Theme server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Name of the shared memory arena.
    pub arena_name: String,
    /// Size of the shared memory arena in bytes.
    pub arena_size: usize,
    /// Connect attempt timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for a spawned server's readiness line.
    pub start_timeout_ms: u64,
    /// Concurrently outstanding calls allowed on the call-based binding.
    pub max_concurrent_calls: usize,
    /// Optional per-request timeout. `None` waits forever.
    pub request_timeout_ms: Option<u64>,
    /// Root directory holding the themes.
    pub themes_dir: Option<PathBuf>,
    /// Directory holding the installed server executable.
    pub install_bin_dir: Option<PathBuf>,
    /// Theme selected when no persisted selection exists.
    pub default_theme: String,
    /// Serve the diagnostics protocol.
    pub diagnostics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            arena_name: ARENA_NAME.to_string(),
            arena_size: DEFAULT_ARENA_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            request_timeout_ms: None,
            themes_dir: None,
            install_bin_dir: COMPILED_BIN_DIR.map(PathBuf::from),
            default_theme: DEFAULT_THEME.to_string(),
            diagnostics: false,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    ///
    /// Environment variables are applied on top of the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("THEMESERVER_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
        if let Some(dir) = lookup(THEMES_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.themes_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.arena_name.is_empty() || self.arena_name.contains('/') {
            return Err(CoreError::Config(format!(
                "invalid arena name {:?}",
                self.arena_name
            )));
        }
        if self.max_concurrent_calls == 0 {
            return Err(CoreError::Config(
                "max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Theme root, either configured or the platform default.
    pub fn themes_dir(&self) -> PathBuf {
        if let Some(dir) = &self.themes_dir {
            return dir.clone();
        }
        if let Some(dir) = COMPILED_THEMES_DIR {
            return PathBuf::from(dir);
        }
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("hb")
            .join("themes")
    }

    /// Connect timeout as a Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Start timeout as a Duration.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Per-request timeout, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
