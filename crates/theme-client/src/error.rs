//! Error types for the theme client.
//!
//! None of these reach application code through the lookup API: lookups
//! degrade to `Invalid`. They surface from the lower-level pieces
//! (transport, bootstrap) and from explicit arena reads.

use theme_arena::ArenaError;
use theme_config_and_utils::CoreError;
use theme_ipc::IpcError;
use theme_lifecycle::LifecycleError;
use theme_resources::ResourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not connected to the theme server")]
    NotConnected,

    #[error("Failed to start the theme server: {0}")]
    SpawnFailed(String),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Resource not found")]
    ResourceNotFound,

    #[error("Stale handle: generation {handle}, arena at {current}")]
    StaleHandle { handle: u64, current: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Request cancelled")]
    Cancelled,

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Arena error: {0}")]
    Arena(ArenaError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Config error: {0}")]
    Config(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ArenaError> for ClientError {
    fn from(err: ArenaError) -> Self {
        match err {
            ArenaError::StaleHandle { handle, current } => Self::StaleHandle { handle, current },
            other => Self::Arena(other),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
