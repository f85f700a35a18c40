//! Error types for theme-resources.

use theme_arena::ArenaError;
use thiserror::Error;

/// Errors from resolving or producing resources.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource too large: {0} bytes")]
    TooLarge(usize),

    #[error("Malformed table: {0}")]
    Malformed(String),
}

/// Result type for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
