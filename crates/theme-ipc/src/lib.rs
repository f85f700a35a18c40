//! IPC layer between theme clients and the theme server.
//!
//! This crate provides:
//! - Length-prefixed frames tagged request / reply / notification
//! - Separate core and diagnostics opcode spaces
//! - Positional field encoding for every request and reply
//! - Unix domain socket server with per-session notification queues

mod codec;
mod error;
mod frame;
mod message;
mod opcode;
mod server;
mod types;

pub use codec::{Wire, WireReader, WireWriter};
pub use error::{IpcError, IpcResult};
pub use frame::{read_frame, write_frame, Frame, FrameKind, FrameReader, FRAME_HEADER_SIZE, MAX_FRAME_LEN};
pub use message::{
    DiagReply, DiagRequest, HandshakeInfo, MultiIconRequest, MultiPartIconRequest, Notification,
    Reply, Request,
};
pub use opcode::{CoreOpcode, DiagOpcode, ProtocolId, PROTOCOL_VERSION};
pub use server::{IpcServer, RequestHandler, SessionId, SessionRegistry};
pub use types::{
    piece_count, ArenaRef, AspectRatioMode, IconFormat, IconId, IconKey, IconMode, LayerPriority,
    RectF, RenderingMode, Rgba, SharedIconInfo, SizeF, BATCH_SIZE_LIMIT, MAX_PIECES,
};
