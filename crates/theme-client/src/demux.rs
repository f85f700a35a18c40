//! One socket connection to the theme server with a demultiplexing reader.
//!
//! The reader task owns the read half. Notification frames go to the
//! [`EventQueue`]; reply frames complete the pending call with the same
//! request id. Because both happen on the same task in arrival order, a
//! notification read before a reply is queued before that reply's waiter
//! wakes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use theme_ipc::{write_frame, Frame, FrameKind, FrameReader, IpcError, Notification};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{ClientError, ClientResult};
use crate::events::EventQueue;

/// Process-wide connection epoch. Bumped for every new connection.
static EPOCH: AtomicU32 = AtomicU32::new(0);

/// Next connection epoch. Never zero, so no request id collides with the
/// notification id.
pub fn next_epoch() -> u32 {
    loop {
        let epoch = EPOCH.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if epoch != 0 {
            return epoch;
        }
    }
}

/// Epoch-tagged request id generator: `(epoch << 32) | sequence`.
#[derive(Debug)]
pub struct RequestIds {
    epoch: u32,
    seq: AtomicU32,
}

impl RequestIds {
    pub fn new(epoch: u32) -> Self {
        Self {
            epoch,
            seq: AtomicU32::new(0),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn next(&self) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        ((self.epoch as u64) << 32) | seq as u64
    }

    /// Epoch a request id was minted under.
    pub fn epoch_of(request_id: u64) -> u32 {
        (request_id >> 32) as u32
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<ClientResult<Frame>>>>>;

/// Removes a pending entry when the waiter goes away, so a late reply
/// finds nobody and is dropped by id.
struct PendingGuard {
    pending: PendingMap,
    request_id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

/// A live connection to the theme server.
pub struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    ids: RequestIds,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Connect to `socket_path` within `timeout`.
    pub async fn connect(
        socket_path: &Path,
        timeout: Duration,
        events: EventQueue,
    ) -> ClientResult<Self> {
        let stream = tokio::time::timeout(timeout, UnixStream::connect(socket_path))
            .await
            .map_err(|_| ClientError::Timeout)??;
        debug!(path = %socket_path.display(), "Connected to theme server");
        Ok(Self::from_stream(stream, events))
    }

    /// Wrap an already connected stream and start its reader task.
    pub fn from_stream(stream: UnixStream, events: EventQueue) -> Self {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            read_half,
            pending.clone(),
            events,
            connected.clone(),
        ));

        Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            ids: RequestIds::new(next_epoch()),
            connected,
            reader,
        }
    }

    pub fn epoch(&self) -> u32 {
        self.ids.epoch()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn next_request_id(&self) -> u64 {
        self.ids.next()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write a frame without waiting for anything back.
    pub async fn send(&self, frame: &Frame) -> ClientResult<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let mut writer = self.writer.lock().await;
        match write_frame(&mut *writer, frame).await {
            Ok(()) => {}
            // Nothing was written; the connection is still usable.
            Err(e @ IpcError::FrameTooLarge { .. }) => return Err(e.into()),
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                return Err(e.into());
            }
        }
        trace!(request_id = frame.request_id, opcode = frame.opcode, "Sent frame");
        Ok(())
    }

    /// Send a request frame and wait for the reply carrying its id.
    ///
    /// Dropping the returned future detaches the waiter.
    pub async fn call(&self, frame: Frame, timeout: Option<Duration>) -> ClientResult<Frame> {
        let request_id = frame.request_id;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            request_id,
        };

        self.send(&frame).await?;

        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.map_err(|_| {
                debug!(request_id, "Call timed out");
                ClientError::Timeout
            })?,
            None => rx.await,
        };
        reply.unwrap_or(Err(ClientError::NotConnected))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    pending: PendingMap,
    events: EventQueue,
    connected: Arc<AtomicBool>,
) {
    let mut frames = FrameReader::new(read_half);
    loop {
        match frames.next_frame().await {
            Ok(Some(frame)) => route(frame, &pending, &events),
            Ok(None) => {
                debug!("Theme server closed the connection");
                break;
            }
            // The frame was consumed; the stream is still in sync.
            Err(IpcError::MalformedFrame { request_id, reason }) => {
                warn!(?request_id, reason = %reason, "Dropping malformed frame");
                let waiter = request_id.and_then(|id| pending.lock().remove(&id));
                if let Some(tx) = waiter {
                    let _ = tx.send(Err(IpcError::Protocol(reason).into()));
                }
            }
            Err(e) => {
                warn!(error = %e, "Connection read failed");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
    // Waking every waiter with a closed channel reports NotConnected.
    pending.lock().clear();
}

fn route(frame: Frame, pending: &PendingMap, events: &EventQueue) {
    match frame.kind {
        FrameKind::Notification => match Notification::from_frame(&frame) {
            Ok(notification) => {
                debug!(?notification, "Theme notification");
                events.push(notification.into());
            }
            Err(e) => warn!(error = %e, "Ignoring malformed notification"),
        },
        FrameKind::Reply => {
            let waiter = pending.lock().remove(&frame.request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(Ok(frame));
                }
                None => debug!(
                    request_id = frame.request_id,
                    epoch = RequestIds::epoch_of(frame.request_id),
                    "Dropping reply with no waiter"
                ),
            }
        }
        FrameKind::Request => warn!(opcode = frame.opcode, "Unexpected request from server"),
    }
}
