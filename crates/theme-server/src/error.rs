//! Error types for the theme server.

use theme_arena::ArenaError;
use theme_config_and_utils::CoreError;
use theme_ipc::IpcError;
use theme_lifecycle::LifecycleError;
use theme_resources::ResourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    #[error("Settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
