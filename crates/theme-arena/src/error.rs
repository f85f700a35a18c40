//! Error types for theme-arena.

use crate::ArenaKind;
use thiserror::Error;

/// Errors that can occur during arena operations.
#[derive(Error, Debug)]
pub enum ArenaError {
    /// Failed to create or open shared memory
    #[error("shared memory error: {0}")]
    SharedMemory(String),

    /// Shared memory object left behind by an earlier owner
    #[error("shared memory object already exists: {0}")]
    AlreadyExists(String),

    /// Failed to map shared memory into address space
    #[error("memory mapping error: {0}")]
    Mmap(String),

    /// Invalid arena header (wrong magic or version)
    #[error("invalid arena header: {0}")]
    InvalidHeader(String),

    /// Requested size does not fit the arena layout
    #[error("invalid arena size: {0}")]
    InvalidSize(String),

    /// No free block large enough
    #[error("{kind:?} allocator out of memory: requested {requested} bytes")]
    OutOfMemory { kind: ArenaKind, requested: usize },

    /// Offset is not a live allocation of the given allocator
    #[error("invalid {kind:?} offset {offset}")]
    InvalidOffset { kind: ArenaKind, offset: i64 },

    /// Handle minted under an older generation
    #[error("stale handle: generation {handle}, arena at {current}")]
    StaleHandle { handle: u64, current: u64 },

    /// Range outside the mapping
    #[error("range out of bounds: offset {offset}, len {len}")]
    OutOfBounds { offset: i64, len: usize },

    /// Write attempted through a read-only mapping
    #[error("arena is mapped read-only")]
    ReadOnly,
}

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;
