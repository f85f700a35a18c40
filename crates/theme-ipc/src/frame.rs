//! Length-prefixed frames.
//!
//! All frames use little-endian byte order.
//!
//! Wire format:
//! ```text
//! [4: len][1: kind][1: protocol][2: opcode][8: request_id][N: body]
//! ```
//!
//! `len` counts everything after itself.

use crate::error::{IpcError, IpcResult};
use crate::opcode::ProtocolId;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header size in bytes (kind + protocol + opcode + request_id).
pub const FRAME_HEADER_SIZE: usize = 1 + 1 + 2 + 8;

/// Largest accepted frame, excluding the length prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = 1,
    Reply = 2,
    Notification = 3,
}

impl FrameKind {
    /// Convert from wire format byte.
    pub fn from_byte(byte: u8) -> IpcResult<Self> {
        match byte {
            1 => Ok(Self::Request),
            2 => Ok(Self::Reply),
            3 => Ok(Self::Notification),
            other => Err(IpcError::Protocol(format!("Unknown frame kind: {:#04x}", other))),
        }
    }
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub protocol: ProtocolId,
    pub opcode: u16,
    /// Echoed by replies; zero for notifications.
    pub request_id: u64,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn request(protocol: ProtocolId, opcode: u16, request_id: u64, body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Request,
            protocol,
            opcode,
            request_id,
            body,
        }
    }

    /// Reply to `request`, echoing its protocol, opcode and id.
    pub fn reply_to(request: &Frame, body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Reply,
            protocol: request.protocol,
            opcode: request.opcode,
            request_id: request.request_id,
            body,
        }
    }

    pub fn notification(opcode: u16, body: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Notification,
            protocol: ProtocolId::Core,
            opcode,
            request_id: 0,
            body,
        }
    }

    /// Encode the frame to bytes (including length prefix).
    ///
    /// Fails with [`IpcError::FrameTooLarge`] above [`MAX_FRAME_LEN`], the
    /// same limit readers enforce.
    pub fn encode(&self) -> IpcResult<Vec<u8>> {
        let total_len = FRAME_HEADER_SIZE + self.body.len();
        if total_len > MAX_FRAME_LEN {
            return Err(IpcError::FrameTooLarge {
                size: total_len,
                max: MAX_FRAME_LEN,
            });
        }
        let mut buf = Vec::with_capacity(4 + total_len);

        buf.extend_from_slice(&(total_len as u32).to_le_bytes());
        buf.push(self.kind as u8);
        buf.push(self.protocol as u8);
        buf.extend_from_slice(&self.opcode.to_le_bytes());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.body);

        Ok(buf)
    }

    /// Decode a frame from bytes (excluding length prefix).
    pub fn decode(data: &[u8]) -> IpcResult<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(IpcError::Protocol(format!(
                "Frame too short: {} bytes, need at least {}",
                data.len(),
                FRAME_HEADER_SIZE
            )));
        }

        let kind = FrameKind::from_byte(data[0])?;
        let protocol = ProtocolId::try_from(data[1])?;
        let opcode = u16::from_le_bytes([data[2], data[3]]);
        let request_id = u64::from_le_bytes(
            data[4..12]
                .try_into()
                .map_err(|_| IpcError::Protocol("Invalid request_id length".to_string()))?,
        );

        Ok(Self {
            kind,
            protocol,
            opcode,
            request_id,
            body: data[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Request id of an undecodable frame, if its header is long enough.
fn peek_request_id(data: &[u8]) -> Option<u64> {
    let id = data.get(4..FRAME_HEADER_SIZE)?;
    Some(u64::from_le_bytes(id.try_into().ok()?))
}

/// Read a length-prefixed frame from a buffer.
///
/// Returns `None` if there isn't enough data for a complete frame.
/// Returns `Some((frame_data, consumed))` with the frame data (excluding length prefix)
/// and the total bytes consumed.
pub fn read_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    if buf.len() < 4 {
        return None;
    }

    let len = u32::from_le_bytes(buf[0..4].try_into().ok()?) as usize;

    if buf.len() < 4 + len {
        return None;
    }

    Some((&buf[4..4 + len], 4 + len))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> IpcResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()?).await?;
    writer.flush().await?;
    Ok(())
}

/// Buffered frame reader over a byte stream.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Next complete frame, or `None` on a clean end of stream.
    pub async fn next_frame(&mut self) -> IpcResult<Option<Frame>> {
        let mut chunk = [0u8; 4096];
        loop {
            if self.buf.len() >= 4 {
                let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                    as usize;
                if len > MAX_FRAME_LEN {
                    return Err(IpcError::FrameTooLarge {
                        size: len,
                        max: MAX_FRAME_LEN,
                    });
                }
            }

            if let Some((data, consumed)) = read_frame(&self.buf) {
                let frame = Frame::decode(data).map_err(|e| IpcError::MalformedFrame {
                    request_id: peek_request_id(data),
                    reason: e.to_string(),
                });
                self.buf.drain(..consumed);
                return frame.map(Some);
            }

            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(IpcError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
