//! Request dispatch: maps protocol requests onto [`ServerState`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use theme_ipc::{
    DiagReply, DiagRequest, Notification, Reply, Request, RequestHandler, SessionId,
    SessionRegistry, PROTOCOL_VERSION,
};
use theme_resources::ResourceKind;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::state::ServerState;

/// Delay between acknowledging `ServerStop` and starting shutdown, so the
/// reply reaches the client first.
pub const STOP_GRACE: Duration = Duration::from_millis(100);

pub struct ThemeDispatcher {
    state: Mutex<ServerState>,
    stop: Arc<Notify>,
}

impl ThemeDispatcher {
    pub fn new(state: ServerState) -> Self {
        Self {
            state: Mutex::new(state),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Signalled once a client asked the server to stop.
    pub fn stop_signal(&self) -> Arc<Notify> {
        self.stop.clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock())
    }

    fn request_stop(&self, session: SessionId, sessions: &SessionRegistry) -> bool {
        if sessions.session_count() != 1 || !sessions.contains(session) {
            warn!(
                session,
                sessions = sessions.session_count(),
                "Stop refused while other clients are connected"
            );
            return false;
        }
        info!(session, "Stop requested");
        let stop = self.stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE).await;
            stop.notify_one();
        });
        true
    }
}

impl RequestHandler for ThemeDispatcher {
    fn session_opened(&self, session: SessionId) {
        self.state.lock().open_session(session);
    }

    fn handle(
        &self,
        session: SessionId,
        request: Request,
        sessions: &SessionRegistry,
    ) -> Option<Reply> {
        match request {
            Request::Handshake { version } => {
                if version != PROTOCOL_VERSION {
                    warn!(session, client = version, server = PROTOCOL_VERSION, "Protocol version mismatch");
                }
                Some(Reply::Handshake(self.state.lock().handshake_info()))
            }
            Request::IconLookup(key) => {
                Some(Reply::Icon(self.state.lock().lookup_icon(session, &key)))
            }
            Request::MultiPartIconLookup(request) => Some(Reply::Icon(
                self.state.lock().lookup_multi_part(session, &request),
            )),
            Request::MultiIconLookup(request) => Some(Reply::IconList(
                self.state.lock().lookup_multi_icon(session, &request),
            )),
            Request::StyleSheetLookup { path, priority } => Some(Reply::Resource(
                self.state
                    .lock()
                    .lookup_style_sheet(session, &path, priority),
            )),
            Request::WidgetLayoutLookup {
                file,
                layout,
                section,
            } => Some(Reply::Resource(
                self.state
                    .lock()
                    .lookup_widget_layout(session, &file, &layout, &section),
            )),
            Request::DeviceProfileLookup => Some(Reply::Resource(
                self.state
                    .lock()
                    .lookup_table(session, ResourceKind::DeviceProfile),
            )),
            Request::TypefaceTableLookup => Some(Reply::Resource(
                self.state
                    .lock()
                    .lookup_table(session, ResourceKind::TypefaceTable),
            )),
            Request::EffectLookup { path } => Some(Reply::Resource(
                self.state.lock().lookup_effect(session, &path),
            )),
            Request::EffectAdd { path } => {
                Some(Reply::Flag(self.state.lock().add_effect(&path)))
            }
            Request::UnloadIcon(id) => {
                self.state.lock().unload_icon(session, &id);
                Some(Reply::Ack)
            }
            Request::UnloadMultiIcon(request) => {
                self.state.lock().unload_multi_icon(session, &request);
                Some(Reply::Ack)
            }
            Request::BatchUnloadIcon(ids) => {
                self.state.lock().batch_unload(session, &ids);
                Some(Reply::Ack)
            }
            Request::ThemeSelection { name } => {
                let changed = self.state.lock().select_theme(&name);
                match changed {
                    Ok(true) => {
                        sessions.notify_all_except(session, &Notification::ThemeChanged(name));
                    }
                    Ok(false) => {}
                    Err(e) => error!(theme = %name, error = %e, "Theme switch failed"),
                }
                None
            }
            Request::ThemeContentUpdate { files } => {
                if let Err(e) = self.state.lock().content_update(&files) {
                    error!(error = %e, "Content update failed");
                }
                sessions.notify_all(&Notification::ThemeContentUpdated(files));
                Some(Reply::Ack)
            }
            Request::ForegroundLost => {
                debug!(session, "Client lost foreground");
                None
            }
            Request::FreeSharedMemory => {
                Some(Reply::Quantity(self.state.lock().free_shared_memory()))
            }
            Request::AllocatedSharedMemory => {
                Some(Reply::Quantity(self.state.lock().allocated_shared_memory()))
            }
            Request::AllocatedHeapMemory => {
                Some(Reply::Quantity(self.state.lock().allocated_heap_memory()))
            }
            Request::SwitchRenderingMode(mode) => {
                self.state.lock().set_rendering_mode(mode);
                Some(Reply::Ack)
            }
            Request::ServerStop => Some(Reply::Flag(self.request_stop(session, sessions))),
        }
    }

    fn handle_diagnostics(&self, _session: SessionId, request: DiagRequest) -> DiagReply {
        self.state.lock().diagnostics(request)
    }

    fn session_closed(&self, session: SessionId) {
        let released = self.state.lock().close_session(session);
        debug!(session, released, "Session closed");
    }
}
