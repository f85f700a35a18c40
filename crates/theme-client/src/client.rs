//! Per-process theme client.
//!
//! The client connects lazily on first use. If bootstrap fails it stays
//! disconnected and every lookup returns `Invalid` immediately until
//! [`ThemeClient::reconnect`] is called. A connection that drops after a
//! successful bootstrap gets one fresh bootstrap on the next call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use theme_config_and_utils::{Config, Paths, DEFAULT_THEME};
use theme_ipc::{
    ArenaRef, CoreOpcode, DiagReply, DiagRequest, HandshakeInfo, IconId, IconKey, LayerPriority,
    MultiIconRequest, MultiPartIconRequest, ProtocolId, RenderingMode, Reply, Request,
    SharedIconInfo,
};
use tracing::{debug, info, trace, warn};

use crate::bootstrap::{Bootstrap, ConnectionState, RetryPolicy, Session};
use crate::error::{ClientError, ClientResult};
use crate::events::{EventQueue, ThemeEvent};
use crate::queue::IconService;
use crate::transport::TransportKind;

static GLOBAL: OnceLock<ThemeClient> = OnceLock::new();

/// Everything needed to build a [`ThemeClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub paths: Paths,
    pub config: Config,
    pub transport: TransportKind,
    pub policy: RetryPolicy,
    /// Start the server when nothing is listening.
    pub spawn_server: bool,
}

impl ClientOptions {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self {
            paths,
            config,
            transport: TransportKind::default(),
            policy: RetryPolicy::default(),
            spawn_server: true,
        }
    }

    /// Paths and config from the environment and `config.json`.
    pub fn from_env() -> ClientResult<Self> {
        let paths = Paths::new()?;
        let config = Config::load(&paths)?;
        Ok(Self::new(paths, config))
    }
}

/// Handle to the theme server for one process.
pub struct ThemeClient {
    bootstrap: Bootstrap,
    transport_kind: TransportKind,
    events: EventQueue,
    session: RwLock<Option<Arc<Session>>>,
    state: Mutex<ConnectionState>,
    gave_up: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
    theme: Mutex<String>,
}

impl ThemeClient {
    pub fn new(options: ClientOptions) -> Self {
        let mut bootstrap =
            Bootstrap::new(options.paths, options.config).with_policy(options.policy);
        if !options.spawn_server {
            bootstrap = bootstrap.without_spawn();
        }
        let theme = match bootstrap.config().default_theme.as_str() {
            "" => DEFAULT_THEME.to_string(),
            name => name.to_string(),
        };

        Self {
            bootstrap,
            transport_kind: options.transport,
            events: EventQueue::new(),
            session: RwLock::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            gave_up: AtomicBool::new(false),
            connect_lock: tokio::sync::Mutex::new(()),
            theme: Mutex::new(theme),
        }
    }

    /// The process-wide client, built from the environment on first use.
    pub fn global() -> &'static ThemeClient {
        GLOBAL.get_or_init(|| {
            let options = ClientOptions::from_env().unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default client settings");
                ClientOptions::new(
                    Paths::with_base_dir(std::env::temp_dir().join(".themeserver")),
                    Config::new(),
                )
            });
            ThemeClient::new(options)
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Deferred theme events pushed by the server.
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Name of the theme the server last reported.
    pub fn current_theme(&self) -> String {
        self.theme.lock().clone()
    }

    /// Handshake record of the live connection.
    pub fn server_info(&self) -> Option<HandshakeInfo> {
        self.current().map(|s| s.info.clone())
    }

    /// Current arena generation as seen through the mapping.
    pub fn generation(&self) -> Option<u64> {
        self.current().map(|s| s.arena.generation())
    }

    /// Drain queued theme events, tracking theme changes on the way.
    pub fn poll_events(&self) -> Vec<ThemeEvent> {
        let events = self.events.drain();
        for event in &events {
            if let ThemeEvent::ThemeChanged(name) = event {
                *self.theme.lock() = name.clone();
            }
        }
        events
    }

    /// Connect now, even after an earlier bootstrap failure.
    pub async fn reconnect(&self) -> bool {
        self.disconnect();
        self.gave_up.store(false, Ordering::Release);
        self.session().await.is_some()
    }

    /// Drop the connection and the arena mapping.
    pub fn disconnect(&self) {
        if self.session.write().take().is_some() {
            debug!("Disconnected from theme server");
        }
        *self.state.lock() = ConnectionState::Disconnected;
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }

    async fn session(&self) -> Option<Arc<Session>> {
        if let Some(session) = self.current() {
            if session.transport.is_connected() {
                return Some(session);
            }
            info!("Theme server connection lost");
            self.disconnect();
        }
        if self.gave_up.load(Ordering::Acquire) {
            return None;
        }

        let _connecting = self.connect_lock.lock().await;
        if let Some(session) = self.current() {
            if session.transport.is_connected() {
                return Some(session);
            }
        }
        if self.gave_up.load(Ordering::Acquire) {
            return None;
        }

        *self.state.lock() = ConnectionState::Connecting;
        match self
            .bootstrap
            .establish(self.transport_kind, &self.events)
            .await
        {
            Ok(session) => {
                *self.theme.lock() = session.info.theme.clone();
                let session = Arc::new(session);
                *self.session.write() = Some(session.clone());
                *self.state.lock() = ConnectionState::Connected;
                Some(session)
            }
            Err(e) => {
                warn!(error = %e, "Theme server unavailable, lookups return Invalid");
                self.gave_up.store(true, Ordering::Release);
                *self.state.lock() = ConnectionState::Disconnected;
                None
            }
        }
    }

    async fn request(&self, request: &Request) -> ClientResult<Reply> {
        let session = self.session().await.ok_or(ClientError::NotConnected)?;
        let opcode = request.opcode();
        let frame = session
            .transport
            .call(ProtocolId::Core, opcode.as_u16(), request.encode_body())
            .await?;
        Reply::from_frame(opcode, &frame).map_err(|e| ClientError::ProtocolMismatch(e.to_string()))
    }

    async fn post(&self, request: &Request) -> ClientResult<()> {
        let session = self.session().await.ok_or(ClientError::NotConnected)?;
        session
            .transport
            .post(ProtocolId::Core, request.opcode().as_u16(), request.encode_body())
            .await
    }

    /// Issue `request` and pull the expected shape out of the reply.
    async fn ask<T>(&self, request: Request, pick: impl FnOnce(Reply) -> Option<T>) -> Option<T> {
        let opcode = request.opcode();
        match self.request(&request).await {
            Ok(reply) => {
                let picked = pick(reply);
                if picked.is_none() {
                    warn!(?opcode, "Reply shape does not match request");
                }
                picked
            }
            Err(e) => {
                log_failure(opcode, &e);
                None
            }
        }
    }

    pub async fn icon_lookup(&self, key: &IconKey) -> SharedIconInfo {
        self.ask(Request::IconLookup(key.clone()), |reply| match reply {
            Reply::Icon(info) => Some(info),
            _ => None,
        })
        .await
        .unwrap_or_default()
    }

    /// Look up a frame icon composed of `piece_count` pieces.
    pub async fn multi_part_icon_lookup(&self, request: &MultiPartIconRequest) -> SharedIconInfo {
        self.ask(Request::MultiPartIconLookup(request.clone()), |reply| match reply {
            Reply::Icon(info) => Some(info),
            _ => None,
        })
        .await
        .unwrap_or_default()
    }

    /// One result per listed icon, in request order.
    pub async fn multi_icon_lookup(&self, request: &MultiIconRequest) -> Vec<SharedIconInfo> {
        let expected = request.paths.len();
        self.ask(Request::MultiIconLookup(request.clone()), |reply| match reply {
            Reply::IconList(list) if list.len() == expected => Some(list),
            _ => None,
        })
        .await
        .unwrap_or_else(|| vec![SharedIconInfo::Invalid; expected])
    }

    pub async fn style_sheet_lookup(
        &self,
        path: &str,
        priority: LayerPriority,
    ) -> Option<ArenaRef> {
        self.resource(Request::StyleSheetLookup {
            path: path.to_string(),
            priority,
        })
        .await
    }

    pub async fn widget_layout_lookup(
        &self,
        file: &str,
        layout: &str,
        section: &str,
    ) -> Option<ArenaRef> {
        self.resource(Request::WidgetLayoutLookup {
            file: file.to_string(),
            layout: layout.to_string(),
            section: section.to_string(),
        })
        .await
    }

    pub async fn device_profile_lookup(&self) -> Option<ArenaRef> {
        self.resource(Request::DeviceProfileLookup).await
    }

    pub async fn typeface_table_lookup(&self) -> Option<ArenaRef> {
        self.resource(Request::TypefaceTableLookup).await
    }

    pub async fn effect_lookup(&self, path: &str) -> Option<ArenaRef> {
        self.resource(Request::EffectLookup {
            path: path.to_string(),
        })
        .await
    }

    /// Register an effect file with the server.
    pub async fn effect_add(&self, path: &str) -> bool {
        self.flag(Request::EffectAdd {
            path: path.to_string(),
        })
        .await
    }

    async fn resource(&self, request: Request) -> Option<ArenaRef> {
        self.ask(request, |reply| match reply {
            Reply::Resource(handle) => Some(handle),
            _ => None,
        })
        .await
        .flatten()
    }

    async fn flag(&self, request: Request) -> bool {
        self.ask(request, |reply| match reply {
            Reply::Flag(value) => Some(value),
            _ => None,
        })
        .await
        .unwrap_or(false)
    }

    async fn ack(&self, request: Request) -> bool {
        self.ask(request, |reply| match reply {
            Reply::Ack => Some(()),
            _ => None,
        })
        .await
        .is_some()
    }

    async fn quantity(&self, request: Request) -> Option<i64> {
        self.ask(request, |reply| match reply {
            Reply::Quantity(value) => Some(value),
            _ => None,
        })
        .await
    }

    /// Drop one reference to an icon.
    pub async fn unload_icon(&self, id: &IconId) -> bool {
        self.ack(Request::UnloadIcon(id.clone())).await
    }

    pub async fn unload_multi_icon(&self, request: &MultiIconRequest) -> bool {
        self.ack(Request::UnloadMultiIcon(request.clone())).await
    }

    /// Drop one reference to each icon, in fixed-size padded batches.
    pub async fn batch_unload_icons(&self, ids: &[IconId]) -> bool {
        let mut all = true;
        for request in Request::batch_unload(ids) {
            all &= self.ack(request).await;
        }
        all
    }

    /// Ask the server to switch theme. Other clients get `ThemeChanged`.
    pub async fn select_theme(&self, name: &str) -> bool {
        let request = Request::ThemeSelection {
            name: name.to_string(),
        };
        match self.post(&request).await {
            Ok(()) => true,
            Err(e) => {
                log_failure(request.opcode(), &e);
                false
            }
        }
    }

    /// Tell the server theme files changed. Empty means everything.
    pub async fn content_update(&self, files: &[String]) -> bool {
        self.ack(Request::ThemeContentUpdate {
            files: files.to_vec(),
        })
        .await
    }

    pub async fn foreground_lost(&self) {
        if let Err(e) = self.post(&Request::ForegroundLost).await {
            log_failure(CoreOpcode::ForegroundLost, &e);
        }
    }

    pub async fn free_shared_memory(&self) -> Option<i64> {
        self.quantity(Request::FreeSharedMemory).await
    }

    pub async fn allocated_shared_memory(&self) -> Option<i64> {
        self.quantity(Request::AllocatedSharedMemory).await
    }

    pub async fn allocated_heap_memory(&self) -> Option<i64> {
        self.quantity(Request::AllocatedHeapMemory).await
    }

    pub async fn switch_rendering_mode(&self, mode: RenderingMode) -> bool {
        self.ack(Request::SwitchRenderingMode(mode)).await
    }

    /// Ask the server to exit. Only honoured for the sole connected client.
    pub async fn server_stop(&self) -> bool {
        self.flag(Request::ServerStop).await
    }

    /// Diagnostics request; `Unsupported` when the server does not serve
    /// diagnostics or cannot be reached.
    pub async fn diagnostics(&self, request: DiagRequest) -> DiagReply {
        let Some(session) = self.session().await else {
            return DiagReply::Unsupported;
        };
        let opcode = request.opcode();
        let body = request.to_frame(0).body;
        match session
            .transport
            .call(ProtocolId::Diagnostics, opcode.as_u16(), body)
            .await
        {
            Ok(frame) if frame.protocol == ProtocolId::Diagnostics && frame.opcode == opcode.as_u16() => {
                DiagReply::decode(opcode, &frame.body).unwrap_or_else(|e| {
                    warn!(?opcode, error = %e, "Malformed diagnostics reply");
                    DiagReply::Unsupported
                })
            }
            Ok(_) => {
                warn!(?opcode, "Diagnostics reply does not match request");
                DiagReply::Unsupported
            }
            Err(e) => {
                debug!(?opcode, error = %e, "Diagnostics request failed");
                DiagReply::Unsupported
            }
        }
    }

    /// Copy a resource out of the shared arena.
    pub fn resource_bytes(&self, handle: &ArenaRef) -> ClientResult<Vec<u8>> {
        let session = self.current().ok_or(ClientError::NotConnected)?;
        if !handle.is_valid() {
            return Err(ClientError::ResourceNotFound);
        }
        let bytes = session
            .arena
            .try_bytes(handle.generation, handle.offset, handle.len as usize)?;
        Ok(bytes.to_vec())
    }
}

fn log_failure(opcode: CoreOpcode, err: &ClientError) {
    match err {
        ClientError::NotConnected => trace!(?opcode, "Not connected"),
        ClientError::ProtocolMismatch(reason) => {
            warn!(?opcode, reason = %reason, "Protocol mismatch")
        }
        other => debug!(?opcode, error = %other, "Request failed"),
    }
}

#[async_trait]
impl IconService for ThemeClient {
    async fn lookup_icon(&self, key: &IconKey) -> SharedIconInfo {
        self.icon_lookup(key).await
    }

    async fn release_icon(&self, id: &IconId) {
        self.unload_icon(id).await;
    }
}

