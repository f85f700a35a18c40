//! IPC error types.

use thiserror::Error;

/// IPC error type.
#[derive(Error, Debug)]
pub enum IpcError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame or body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Opcode outside the closed table
    #[error("Unknown opcode {opcode} for protocol {protocol}")]
    UnknownOpcode { protocol: u8, opcode: u16 },

    /// A complete frame whose header did not decode. The stream stays in
    /// sync; `request_id` is set when the id field was readable.
    #[error("Malformed frame (request {request_id:?}): {reason}")]
    MalformedFrame {
        request_id: Option<u64>,
        reason: String,
    },

    /// Frame exceeds the size limit
    #[error("Frame too large: {size} bytes, max {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Socket error
    #[error("Socket error: {0}")]
    Socket(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using IpcError.
pub type IpcResult<T> = Result<T, IpcError>;
