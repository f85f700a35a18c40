//! IPC server implementation.
//!
//! Every connection is a session with one outbound frame queue. Replies and
//! notifications for a session go through the same queue, so a notification
//! queued before a reply is written before it. A writer task per session
//! drains the queue onto the socket.
//!
//! Requests on one connection are handled in arrival order; the handler runs
//! to completion before the next frame of that connection is read.

use crate::frame::{write_frame, Frame, FrameKind, FrameReader};
use crate::message::{DiagReply, DiagRequest, Notification, Reply, Request};
use crate::opcode::{CoreOpcode, DiagOpcode, ProtocolId};
use crate::{IpcError, IpcResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Identifier of one client connection.
pub type SessionId = u64;

/// Server-side request handling.
pub trait RequestHandler: Send + Sync + 'static {
    fn session_opened(&self, _session: SessionId) {}

    /// Handle one core request. `None` sends an empty reply body, which the
    /// client treats as a protocol mismatch. Requests that take no reply
    /// have their return value discarded.
    fn handle(&self, session: SessionId, request: Request, sessions: &SessionRegistry)
        -> Option<Reply>;

    fn handle_diagnostics(&self, _session: SessionId, _request: DiagRequest) -> DiagReply {
        DiagReply::Unsupported
    }

    /// Called once the connection is gone.
    fn session_closed(&self, _session: SessionId) {}
}

/// Outbound queues of all live sessions.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    senders: Arc<Mutex<HashMap<SessionId, mpsc::UnboundedSender<Frame>>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its outbound queue.
    pub fn register(&self) -> (SessionId, mpsc::UnboundedReceiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().insert(id, tx);
        (id, rx)
    }

    /// Drop a session's queue. Its writer stops after draining.
    pub fn unregister(&self, session: SessionId) {
        self.senders.lock().remove(&session);
    }

    pub fn session_count(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.senders.lock().contains_key(&session)
    }

    /// Queue a frame for one session.
    pub fn send(&self, session: SessionId, frame: Frame) -> bool {
        match self.senders.lock().get(&session) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn notify(&self, session: SessionId, notification: &Notification) -> bool {
        self.send(session, notification.to_frame())
    }

    pub fn notify_all(&self, notification: &Notification) {
        self.broadcast(None, notification);
    }

    /// Notify every session except `origin`.
    pub fn notify_all_except(&self, origin: SessionId, notification: &Notification) {
        self.broadcast(Some(origin), notification);
    }

    fn broadcast(&self, skip: Option<SessionId>, notification: &Notification) {
        let frame = notification.to_frame();
        let senders = self.senders.lock();
        for (id, tx) in senders.iter() {
            if Some(*id) == skip {
                continue;
            }
            // Ignore send errors (session closing)
            let _ = tx.send(frame.clone());
        }
        debug!(opcode = frame.opcode, ?skip, "Notification queued");
    }
}

/// IPC server that listens on a Unix domain socket.
pub struct IpcServer<H: RequestHandler> {
    socket_path: PathBuf,
    handler: Arc<H>,
    sessions: SessionRegistry,
    shutdown_tx: broadcast::Sender<()>,
    diagnostics: bool,
}

impl<H: RequestHandler> IpcServer<H> {
    /// Create a new IPC server.
    pub fn new(socket_path: impl AsRef<Path>, handler: Arc<H>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            handler,
            sessions: SessionRegistry::new(),
            shutdown_tx,
            diagnostics: false,
        }
    }

    /// Serve the diagnostics protocol.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get a shutdown sender (for handlers that need to trigger shutdown).
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the listening socket, replacing a stale socket file.
    pub fn bind(&self) -> IpcResult<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "IPC server listening");
        Ok(listener)
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    pub async fn serve(&self, listener: UnixListener) -> IpcResult<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _)) => {
                            let handler = self.handler.clone();
                            let sessions = self.sessions.clone();
                            let diagnostics = self.diagnostics;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handler, sessions, diagnostics).await {
                                    error!(error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        // Cleanup socket file
        let _ = std::fs::remove_file(&self.socket_path);

        Ok(())
    }
}

/// Handle a single client connection.
async fn handle_connection<H: RequestHandler>(
    stream: UnixStream,
    handler: Arc<H>,
    sessions: SessionRegistry,
    diagnostics: bool,
) -> IpcResult<()> {
    let (reader, mut writer) = stream.into_split();
    let (session, mut outbound) = sessions.register();
    handler.session_opened(session);
    debug!(session, "Client connected");

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match write_frame(&mut writer, &frame).await {
                Ok(()) => {}
                Err(e @ IpcError::FrameTooLarge { .. }) => {
                    warn!(session, opcode = frame.opcode, error = %e, "Dropping oversized frame");
                }
                Err(e) => {
                    debug!(session, error = %e, "Failed to write frame, client disconnected");
                    break;
                }
            }
        }
    });

    let mut reader = FrameReader::new(reader);
    let result = loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                dispatch_frame(session, frame, handler.as_ref(), &sessions, diagnostics)
            }
            Ok(None) => {
                debug!(session, "Client disconnected");
                break Ok(());
            }
            Err(e) => {
                warn!(session, error = %e, "Dropping connection after read error");
                break Err(e);
            }
        }
    };

    sessions.unregister(session);
    handler.session_closed(session);
    let _ = writer_task.await;

    result
}

fn dispatch_frame<H: RequestHandler>(
    session: SessionId,
    frame: Frame,
    handler: &H,
    sessions: &SessionRegistry,
    diagnostics: bool,
) {
    if frame.kind != FrameKind::Request {
        warn!(session, kind = ?frame.kind, "Ignoring non-request frame");
        return;
    }

    match frame.protocol {
        ProtocolId::Core => {
            let expects_reply = CoreOpcode::from_u16(frame.opcode)
                .map(Request::expects_reply_to)
                .unwrap_or(true);

            let body = match Request::from_frame(&frame) {
                Ok(request) => {
                    let opcode = request.opcode();
                    debug!(session, ?opcode, id = frame.request_id, "Request");
                    handler
                        .handle(session, request, sessions)
                        .map(|reply| reply.encode_body())
                        .unwrap_or_default()
                }
                Err(e) => {
                    warn!(
                        session,
                        opcode = frame.opcode,
                        error = %e,
                        "Malformed request, replying empty"
                    );
                    Vec::new()
                }
            };

            if expects_reply {
                sessions.send(session, Frame::reply_to(&frame, body));
            }
        }
        ProtocolId::Diagnostics => {
            let reply = if !diagnostics {
                DiagReply::Unsupported
            } else {
                match DiagRequest::from_frame(&frame) {
                    Ok(request) => handler.handle_diagnostics(session, request),
                    Err(e) => {
                        warn!(session, error = %e, "Malformed diagnostics request");
                        DiagReply::Unsupported
                    }
                }
            };
            if DiagOpcode::from_u16(frame.opcode).is_err() {
                debug!(session, opcode = frame.opcode, "Unknown diagnostics opcode");
            }
            sessions.send(session, Frame::reply_to(&frame, reply.encode_body()));
        }
    }
}
