//! Resource loading with a process-local fallback.
//!
//! [`ResourceLoader`] asks the server first. When the answer is `Invalid`
//! (not found, server unreachable, protocol mismatch) it resolves the file
//! itself and produces the resource into a private arena owned by this
//! process. Local results are cached for the loader's lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use theme_arena::Arena;
use theme_config_and_utils::Config;
use theme_ipc::{ArenaRef, IconKey, LayerPriority, SharedIconInfo};
use theme_resources::{
    build_theme_indexes, resolve_icon, FileProducer, ResourceKind, ResourceProducer, ThemeRoots,
};
use tracing::{debug, warn};

use crate::client::ThemeClient;
use crate::error::{ClientError, ClientResult};

/// Size of the private arena backing local production.
pub const LOCAL_ARENA_SIZE: usize = 4 * 1024 * 1024;

/// Where a resource was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// In the server's shared arena.
    Server,
    /// In this process's private arena.
    Local,
}

/// A resource and the arena it lives in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    pub origin: Origin,
}

#[derive(Default)]
struct LocalCache {
    arena: Option<Arena>,
    icons: HashMap<IconKey, SharedIconInfo>,
    data: HashMap<(ResourceKind, String), ArenaRef>,
}

pub struct ResourceLoader {
    client: Arc<ThemeClient>,
    roots: Mutex<ThemeRoots>,
    producer: Box<dyn ResourceProducer>,
    local: Mutex<LocalCache>,
    local_size: usize,
}

impl ResourceLoader {
    pub fn new(client: Arc<ThemeClient>, roots: ThemeRoots) -> Self {
        Self {
            client,
            roots: Mutex::new(roots),
            producer: Box::new(FileProducer::new()),
            local: Mutex::new(LocalCache::default()),
            local_size: LOCAL_ARENA_SIZE,
        }
    }

    pub fn from_config(client: Arc<ThemeClient>, config: &Config) -> Self {
        Self::new(client, ThemeRoots::from_config(config))
    }

    pub fn with_producer(mut self, producer: Box<dyn ResourceProducer>) -> Self {
        self.producer = producer;
        self
    }

    pub fn client(&self) -> &ThemeClient {
        &self.client
    }

    /// Follow a theme change: local resources are dropped and the local
    /// index tables rebuilt on next use.
    pub fn set_active_theme(&self, name: &str) {
        self.roots.lock().set_active_theme(name);
        *self.local.lock() = LocalCache::default();
        debug!(theme = name, "Local resource cache cleared");
    }

    /// Number of icons produced locally.
    pub fn local_icon_count(&self) -> usize {
        self.local.lock().icons.len()
    }

    pub async fn icon(&self, key: &IconKey) -> Loaded<SharedIconInfo> {
        let info = self.client.icon_lookup(key).await;
        if info.is_valid() {
            return Loaded {
                value: info,
                origin: Origin::Server,
            };
        }
        Loaded {
            value: self.local_icon(key),
            origin: Origin::Local,
        }
    }

    pub async fn style_sheet(&self, path: &str, priority: LayerPriority) -> Option<Loaded<ArenaRef>> {
        let served = self.client.style_sheet_lookup(path, priority).await;
        self.or_local(served, ResourceKind::StyleSheet, path)
    }

    pub async fn widget_layout(
        &self,
        file: &str,
        layout: &str,
        section: &str,
    ) -> Option<Loaded<ArenaRef>> {
        let served = self.client.widget_layout_lookup(file, layout, section).await;
        self.or_local(served, ResourceKind::WidgetLayout, file)
    }

    pub async fn effect(&self, path: &str) -> Option<Loaded<ArenaRef>> {
        let served = self.client.effect_lookup(path).await;
        self.or_local(served, ResourceKind::Effect, path)
    }

    pub async fn device_profiles(&self) -> Option<Loaded<ArenaRef>> {
        let served = self.client.device_profile_lookup().await;
        self.or_local(served, ResourceKind::DeviceProfile, "")
    }

    pub async fn typeface_table(&self) -> Option<Loaded<ArenaRef>> {
        let served = self.client.typeface_table_lookup().await;
        self.or_local(served, ResourceKind::TypefaceTable, "")
    }

    /// Release an icon obtained from [`icon`](Self::icon). Local icons stay
    /// cached.
    pub async fn release_icon(&self, key: &IconKey, loaded: &Loaded<SharedIconInfo>) {
        if loaded.origin == Origin::Server && loaded.value.is_valid() {
            self.client.unload_icon(&key.id).await;
        }
    }

    /// Copy a resource's bytes out of whichever arena holds it.
    pub fn bytes(&self, loaded: &Loaded<ArenaRef>) -> ClientResult<Vec<u8>> {
        match loaded.origin {
            Origin::Server => self.client.resource_bytes(&loaded.value),
            Origin::Local => {
                let local = self.local.lock();
                let arena = local.arena.as_ref().ok_or(ClientError::ResourceNotFound)?;
                let handle = loaded.value;
                Ok(arena
                    .try_bytes(handle.generation, handle.offset, handle.len as usize)?
                    .to_vec())
            }
        }
    }

    /// Bytes of an icon, if it has an arena payload.
    pub fn icon_bytes(&self, loaded: &Loaded<SharedIconInfo>) -> ClientResult<Vec<u8>> {
        let handle = loaded.value.handle().ok_or(ClientError::ResourceNotFound)?;
        self.bytes(&Loaded {
            value: handle,
            origin: loaded.origin,
        })
    }

    fn or_local(
        &self,
        served: Option<ArenaRef>,
        kind: ResourceKind,
        logical: &str,
    ) -> Option<Loaded<ArenaRef>> {
        if let Some(handle) = served {
            return Some(Loaded {
                value: handle,
                origin: Origin::Server,
            });
        }
        self.local_data(kind, logical).map(|handle| Loaded {
            value: handle,
            origin: Origin::Local,
        })
    }

    fn local_icon(&self, key: &IconKey) -> SharedIconInfo {
        let roots = self.roots.lock().clone();
        let mut local = self.local.lock();
        if let Some(info) = local.icons.get(key) {
            return *info;
        }
        let Some(arena) = self.local_arena(&mut local, &roots) else {
            return SharedIconInfo::Invalid;
        };

        let Some(source) = resolve_icon(&roots, arena, &key.id.path, key.id.mirrored) else {
            debug!(path = %key.id.path, "Icon not found locally");
            return SharedIconInfo::Invalid;
        };
        match self.producer.produce_icon(arena, key, &source) {
            Ok(info) => {
                debug!(path = %key.id.path, source = %source.display(), "Produced icon locally");
                local.icons.insert(key.clone(), info);
                info
            }
            Err(e) => {
                warn!(path = %key.id.path, error = %e, "Local icon production failed");
                SharedIconInfo::Invalid
            }
        }
    }

    fn local_data(&self, kind: ResourceKind, logical: &str) -> Option<ArenaRef> {
        let roots = self.roots.lock().clone();
        let mut local = self.local.lock();
        let cache_key = (kind, logical.to_string());
        if let Some(handle) = local.data.get(&cache_key) {
            return Some(*handle);
        }

        let source = match kind {
            ResourceKind::DeviceProfile | ResourceKind::TypefaceTable => roots.resolve_table(kind),
            _ => roots.resolve(kind, logical, false),
        }?;
        let arena = self.local_arena(&mut local, &roots)?;
        match self.producer.produce_data(arena, &source) {
            Ok(handle) => {
                local.data.insert(cache_key, handle);
                Some(handle)
            }
            Err(e) => {
                warn!(?kind, logical, error = %e, "Local production failed");
                None
            }
        }
    }

    /// The private arena, created with index tables on first use.
    fn local_arena<'a>(&self, local: &'a mut LocalCache, roots: &ThemeRoots) -> Option<&'a mut Arena> {
        if local.arena.is_none() {
            let mut arena = match Arena::private(self.local_size) {
                Ok(arena) => arena,
                Err(e) => {
                    warn!(error = %e, "Cannot create local arena");
                    return None;
                }
            };
            if let Err(e) = build_theme_indexes(roots, &mut arena) {
                debug!(error = %e, "Local theme index unavailable");
            }
            local.arena = Some(arena);
        }
        local.arena.as_mut()
    }
}
