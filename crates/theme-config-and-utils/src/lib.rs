//! Configuration, runtime paths and logging shared by the theme server and
//! its clients.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, ARENA_NAME, DEFAULT_ARENA_SIZE, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_CONCURRENT_CALLS, DEFAULT_START_TIMEOUT_MS, DEFAULT_THEME, SERVER_NAME,
    THEMES_DIR_ENV,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogConfig};
pub use paths::{Paths, BASE_DIR_ENV};
