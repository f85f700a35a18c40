//! Server state: the arena, the caches and the references each session holds.
//!
//! Everything here runs under the dispatcher's single lock, so a request is
//! processed completely before the next one touches the arena.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use theme_arena::{Arena, ArenaError, ArenaKind};
use theme_config_and_utils::{Config, Paths};
use theme_ipc::{
    ArenaRef, DiagReply, DiagRequest, HandshakeInfo, IconId, IconKey, LayerPriority,
    MultiIconRequest, MultiPartIconRequest, RenderingMode, SessionId, SharedIconInfo,
    PROTOCOL_VERSION,
};
use theme_resources::{
    build_theme_indexes, encode_composite, resolve_icon, FileProducer, PieceData, ResourceError,
    ResourceKind, ResourceProducer, ResourceResult, ThemeRoots, DEVICE_PROFILES_FILE,
    TYPEFACES_FILE,
};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStats, RefCountedCache, Released};
use crate::error::ServerResult;

/// Persisted server settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeSettings {
    /// Last selected theme.
    pub theme: Option<String>,
}

impl ThemeSettings {
    pub fn load(path: &Path) -> ServerResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> ServerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Cache key of a non-icon resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub kind: ResourceKind,
    /// Logical file name.
    pub name: String,
    /// `layout/section` for widget layouts, empty otherwise.
    pub section: String,
}

impl DataKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            section: String::new(),
        }
    }

    pub fn layout(file: &str, layout: &str, section: &str) -> Self {
        Self {
            kind: ResourceKind::WidgetLayout,
            name: file.to_string(),
            section: format!("{}/{}", layout, section),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Held {
    Icon(IconId),
    Data(DataKey),
}

/// References one session holds, per cache entry.
#[derive(Debug, Default)]
struct SessionRefs {
    held: HashMap<Held, u32>,
}

impl SessionRefs {
    fn hold(&mut self, item: Held) {
        *self.held.entry(item).or_insert(0) += 1;
    }

    fn drop_one(&mut self, item: &Held) -> bool {
        match self.held.get_mut(item) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.held.remove(item);
                }
                true
            }
            None => false,
        }
    }

    fn total(&self) -> usize {
        self.held.values().map(|n| *n as usize).sum()
    }
}

pub struct ServerState {
    arena: Arena,
    arena_name: String,
    roots: ThemeRoots,
    producer: Box<dyn ResourceProducer>,
    icons: RefCountedCache<IconId, SharedIconInfo>,
    data: RefCountedCache<DataKey, ArenaRef>,
    /// Multi-part request id -> composite cache id.
    composites: HashMap<IconId, IconId>,
    /// Composite cache id -> logical names of its pieces.
    composite_pieces: HashMap<IconId, Vec<String>>,
    /// Effects pinned by `EffectAdd`.
    registered_effects: HashSet<String>,
    sessions: HashMap<SessionId, SessionRefs>,
    rendering_mode: RenderingMode,
    settings_path: Option<PathBuf>,
}

impl ServerState {
    pub fn new(arena: Arena, arena_name: impl Into<String>, roots: ThemeRoots) -> Self {
        Self {
            arena,
            arena_name: arena_name.into(),
            roots,
            producer: Box::new(FileProducer::new()),
            icons: RefCountedCache::new(),
            data: RefCountedCache::new(),
            composites: HashMap::new(),
            composite_pieces: HashMap::new(),
            registered_effects: HashSet::new(),
            sessions: HashMap::new(),
            rendering_mode: RenderingMode::default(),
            settings_path: None,
        }
    }

    /// Create the shared arena, restore the persisted theme and build the
    /// theme index tables.
    pub fn open(config: &Config, paths: &Paths) -> ServerResult<Self> {
        let mut roots = ThemeRoots::from_config(config);
        let settings_path = paths.settings_file();

        match ThemeSettings::load(&settings_path) {
            Ok(ThemeSettings { theme: Some(theme) }) if roots.theme_exists(&theme) => {
                roots.set_active_theme(theme);
            }
            Ok(ThemeSettings { theme: Some(theme) }) => {
                warn!(theme = %theme, "Persisted theme is not installed, using base theme");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Unreadable settings, using base theme"),
        }

        let mut arena = Arena::create(&config.arena_name, config.arena_size)?;
        build_theme_indexes(&roots, &mut arena)?;
        info!(
            themes_dir = %roots.themes_dir().display(),
            theme = roots.active_theme(),
            base = roots.base_theme(),
            "Theme roots ready"
        );

        Ok(Self::new(arena, &config.arena_name, roots).with_settings_path(settings_path))
    }

    pub fn with_producer(mut self, producer: Box<dyn ResourceProducer>) -> Self {
        self.producer = producer;
        self
    }

    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn active_theme(&self) -> &str {
        self.roots.active_theme()
    }

    pub fn generation(&self) -> u64 {
        self.arena.generation()
    }

    pub fn rendering_mode(&self) -> RenderingMode {
        self.rendering_mode
    }

    pub fn handshake_info(&self) -> HandshakeInfo {
        HandshakeInfo {
            protocol_version: PROTOCOL_VERSION,
            arena_name: self.arena_name.clone(),
            arena_size: self.arena.size() as u64,
            generation: self.arena.generation(),
            theme: self.roots.active_theme().to_string(),
        }
    }

    pub fn icon_refcount(&self, id: &IconId) -> Option<u32> {
        self.icons.refcount(id)
    }

    pub fn data_refcount(&self, key: &DataKey) -> Option<u32> {
        self.data.refcount(key)
    }

    pub fn cached_icons(&self) -> usize {
        self.icons.len()
    }

    pub fn icon_stats(&self) -> CacheStats {
        self.icons.stats()
    }

    /// References a session currently holds.
    pub fn session_refs(&self, session: SessionId) -> usize {
        self.sessions.get(&session).map_or(0, SessionRefs::total)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub fn open_session(&mut self, session: SessionId) {
        self.sessions.entry(session).or_default();
    }

    /// Release every reference the session still holds.
    pub fn close_session(&mut self, session: SessionId) -> usize {
        let Some(refs) = self.sessions.remove(&session) else {
            return 0;
        };
        let mut released = 0;
        for (item, count) in refs.held {
            for _ in 0..count {
                self.release(&item);
                released += 1;
            }
        }
        released
    }

    fn hold(&mut self, session: SessionId, item: Held) {
        self.sessions.entry(session).or_default().hold(item);
    }

    fn release(&mut self, item: &Held) {
        match item {
            Held::Icon(id) => self.release_icon(id),
            Held::Data(key) => {
                if let Released::Reclaimed(handle) = self.data.release(key) {
                    self.free_ref(handle);
                }
            }
        }
    }

    fn release_icon(&mut self, id: &IconId) {
        if let Released::Reclaimed(info) = self.icons.release(id) {
            self.free_icon(info);
            self.forget_composite(id);
        }
    }

    fn forget_composite(&mut self, cache_id: &IconId) {
        self.composites.retain(|_, id| id != cache_id);
        self.composite_pieces.remove(cache_id);
    }

    // ------------------------------------------------------------------
    // Arena payloads
    // ------------------------------------------------------------------

    fn free_icon(&mut self, info: SharedIconInfo) {
        if let Some(handle) = info.handle() {
            self.free_ref(handle);
        }
    }

    fn free_ref(&mut self, handle: ArenaRef) {
        if !handle.is_valid() || handle.generation != self.arena.generation() {
            return;
        }
        if let Err(e) = self.arena.free(ArenaKind::Shared, handle.offset) {
            warn!(offset = handle.offset, error = %e, "Failed to free resource");
        }
    }

    /// Free every retained unused entry. Returns how many were reclaimed.
    fn reclaim_unused(&mut self) -> usize {
        let icons = self.icons.clean();
        let data = self.data.clean();
        let count = icons.len() + data.len();
        for info in icons {
            self.free_icon(info);
        }
        for handle in data {
            self.free_ref(handle);
        }
        if count > 0 {
            debug!(count, "Reclaimed unused cache entries");
        }
        count
    }

    fn produce_icon(&mut self, key: &IconKey, source: &Path) -> ResourceResult<SharedIconInfo> {
        let first = self.producer.produce_icon(&mut self.arena, key, source);
        if is_out_of_memory(&first) && self.reclaim_unused() > 0 {
            return self.producer.produce_icon(&mut self.arena, key, source);
        }
        first
    }

    fn produce_data(&mut self, source: &Path) -> ResourceResult<ArenaRef> {
        let first = self.producer.produce_data(&mut self.arena, source);
        if is_out_of_memory(&first) && self.reclaim_unused() > 0 {
            return self.producer.produce_data(&mut self.arena, source);
        }
        first
    }

    // ------------------------------------------------------------------
    // Icons
    // ------------------------------------------------------------------

    pub fn lookup_icon(&mut self, session: SessionId, key: &IconKey) -> SharedIconInfo {
        match self.acquire_icon(key) {
            Some(info) => {
                self.hold(session, Held::Icon(key.id.clone()));
                info
            }
            None => SharedIconInfo::Invalid,
        }
    }

    /// Take a cache reference on an icon, producing it on a miss.
    fn acquire_icon(&mut self, key: &IconKey) -> Option<SharedIconInfo> {
        if key.id.is_padding() {
            return None;
        }
        if let Some(info) = self.icons.acquire(&key.id) {
            return Some(info);
        }

        let Some(source) = resolve_icon(&self.roots, &self.arena, &key.id.path, key.id.mirrored)
        else {
            debug!(path = %key.id.path, "Icon not found");
            return None;
        };
        match self.produce_icon(key, &source) {
            Ok(info) if info.is_valid() => {
                if let Some(old) = self.icons.insert(key.id.clone(), info) {
                    self.free_icon(old);
                }
                debug!(path = %key.id.path, source = %source.display(), "Icon produced");
                Some(info)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(path = %key.id.path, error = %e, "Failed to produce icon");
                None
            }
        }
    }

    pub fn lookup_multi_icon(
        &mut self,
        session: SessionId,
        request: &MultiIconRequest,
    ) -> Vec<SharedIconInfo> {
        request
            .keys()
            .iter()
            .map(|key| self.lookup_icon(session, key))
            .collect()
    }

    /// Look up a multi-part icon as one composite blob.
    ///
    /// The composite is cached under `<dir of first piece>/<composite id>`.
    /// Pieces are released once their bytes are copied into the composite.
    pub fn lookup_multi_part(
        &mut self,
        session: SessionId,
        request: &MultiPartIconRequest,
    ) -> SharedIconInfo {
        let Some(first) = request.pieces.first() else {
            return SharedIconInfo::Invalid;
        };
        let Some(first_file) = resolve_icon(&self.roots, &self.arena, first, request.key.id.mirrored)
        else {
            debug!(composite = request.composite_id(), piece = %first, "First piece not found");
            return SharedIconInfo::Invalid;
        };
        let dir = first_file
            .parent()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        let mut cache_id = request.key.id.clone();
        cache_id.path = format!("{}/{}", dir, request.composite_id());

        let info = match self.icons.acquire(&cache_id) {
            Some(info) => info,
            None => match self.build_composite(request) {
                Some(info) => {
                    if let Some(old) = self.icons.insert(cache_id.clone(), info) {
                        self.free_icon(old);
                    }
                    self.composite_pieces
                        .insert(cache_id.clone(), request.pieces.clone());
                    info
                }
                None => return SharedIconInfo::Invalid,
            },
        };
        self.composites
            .insert(request.key.id.clone(), cache_id.clone());
        self.hold(session, Held::Icon(cache_id));
        info
    }

    fn build_composite(&mut self, request: &MultiPartIconRequest) -> Option<SharedIconInfo> {
        let mut acquired: Vec<(IconId, SharedIconInfo)> = Vec::with_capacity(request.pieces.len());
        for index in 0..request.pieces.len() {
            let piece = request
                .piece_key(index)
                .and_then(|key| self.acquire_icon(&key).map(|info| (key.id, info)));
            match piece {
                Some(piece) if piece.1.handle().is_some() => acquired.push(piece),
                other => {
                    debug!(
                        composite = request.composite_id(),
                        index,
                        "Piece unavailable, composite is invalid"
                    );
                    acquired.extend(other);
                    self.release_pieces(acquired);
                    return None;
                }
            }
        }

        let blob = self.pack_composite(request, &acquired);
        self.release_pieces(acquired);
        let blob = match blob {
            Ok(blob) => blob,
            Err(e) => {
                warn!(composite = request.composite_id(), error = %e, "Failed to pack composite");
                return None;
            }
        };

        let len = u32::try_from(blob.len()).ok()?;
        let offset = match self.arena.alloc_bytes(ArenaKind::Shared, &blob) {
            Ok(offset) => offset,
            Err(e) => {
                warn!(composite = request.composite_id(), error = %e, "Failed to store composite");
                return None;
            }
        };
        Some(SharedIconInfo::Blob {
            handle: ArenaRef::new(offset, len, self.arena.generation()),
        })
    }

    fn pack_composite(
        &self,
        request: &MultiPartIconRequest,
        pieces: &[(IconId, SharedIconInfo)],
    ) -> ResourceResult<Vec<u8>> {
        let mut packed = Vec::with_capacity(pieces.len());
        for (index, (id, info)) in pieces.iter().enumerate() {
            let handle = info
                .handle()
                .ok_or_else(|| ResourceError::NotFound(id.path.clone()))?;
            let bytes = self
                .arena
                .try_bytes(handle.generation, handle.offset, handle.len as usize)?;
            packed.push(PieceData {
                format: info.format(),
                source: request.source_rects.get(index).copied().unwrap_or_default(),
                target: request.target_rects.get(index).copied().unwrap_or_default(),
                size: request.piece_sizes.get(index).copied().unwrap_or_default(),
                bytes,
            });
        }
        encode_composite(&packed)
    }

    fn release_pieces(&mut self, pieces: Vec<(IconId, SharedIconInfo)>) {
        for (id, _) in pieces {
            self.release_icon(&id);
        }
    }

    pub fn unload_icon(&mut self, session: SessionId, id: &IconId) {
        if id.is_padding() {
            return;
        }
        let cache_id = self.composites.get(id).cloned().unwrap_or_else(|| id.clone());
        let item = Held::Icon(cache_id.clone());
        let held = self
            .sessions
            .get_mut(&session)
            .is_some_and(|refs| refs.drop_one(&item));
        if !held {
            warn!(session, path = %id.path, "Unload of an icon the session does not hold");
            return;
        }
        self.release_icon(&cache_id);
    }

    pub fn unload_multi_icon(&mut self, session: SessionId, request: &MultiIconRequest) {
        for key in request.keys() {
            self.unload_icon(session, &key.id);
        }
    }

    pub fn batch_unload(&mut self, session: SessionId, ids: &[IconId]) {
        for id in ids.iter().filter(|id| !id.is_padding()) {
            self.unload_icon(session, id);
        }
    }

    // ------------------------------------------------------------------
    // Stylesheets, layouts, tables and effects
    // ------------------------------------------------------------------

    /// Take a cache reference on a data resource. The flag is true when the
    /// resource was produced by this call.
    fn acquire_data(&mut self, key: &DataKey) -> Option<(ArenaRef, bool)> {
        if let Some(handle) = self.data.acquire(key) {
            return Some((handle, false));
        }
        let source = match key.kind {
            ResourceKind::DeviceProfile | ResourceKind::TypefaceTable => {
                self.roots.resolve_table(key.kind)
            }
            kind => self.roots.resolve(kind, &key.name, false),
        };
        let Some(source) = source else {
            debug!(kind = ?key.kind, name = %key.name, "Resource not found");
            return None;
        };
        match self.produce_data(&source) {
            Ok(handle) => {
                if let Some(old) = self.data.insert(key.clone(), handle) {
                    self.free_ref(old);
                }
                debug!(kind = ?key.kind, source = %source.display(), "Resource produced");
                Some((handle, true))
            }
            Err(e) => {
                warn!(kind = ?key.kind, name = %key.name, error = %e, "Failed to produce resource");
                None
            }
        }
    }

    fn lookup_data(&mut self, session: SessionId, key: DataKey) -> Option<(ArenaRef, bool)> {
        let found = self.acquire_data(&key)?;
        self.hold(session, Held::Data(key));
        Some(found)
    }

    /// Stylesheets of `Core` priority keep one extra reference for the
    /// server's lifetime.
    pub fn lookup_style_sheet(
        &mut self,
        session: SessionId,
        path: &str,
        priority: LayerPriority,
    ) -> Option<ArenaRef> {
        let key = DataKey::new(ResourceKind::StyleSheet, path);
        let (handle, fresh) = self.lookup_data(session, key.clone())?;
        if fresh && priority == LayerPriority::Core {
            self.data.add_ref(&key);
        }
        Some(handle)
    }

    pub fn lookup_widget_layout(
        &mut self,
        session: SessionId,
        file: &str,
        layout: &str,
        section: &str,
    ) -> Option<ArenaRef> {
        self.lookup_data(session, DataKey::layout(file, layout, section))
            .map(|(handle, _)| handle)
    }

    /// Device profile or typeface table.
    pub fn lookup_table(&mut self, session: SessionId, kind: ResourceKind) -> Option<ArenaRef> {
        let name = match kind {
            ResourceKind::DeviceProfile => DEVICE_PROFILES_FILE,
            ResourceKind::TypefaceTable => TYPEFACES_FILE,
            _ => return None,
        };
        self.lookup_data(session, DataKey::new(kind, name))
            .map(|(handle, _)| handle)
    }

    pub fn lookup_effect(&mut self, session: SessionId, path: &str) -> Option<ArenaRef> {
        self.lookup_data(session, DataKey::new(ResourceKind::Effect, path))
            .map(|(handle, _)| handle)
    }

    /// Register an effect: produce it if needed and pin it until the next
    /// theme change or content update.
    pub fn add_effect(&mut self, path: &str) -> bool {
        if self.registered_effects.contains(path) {
            return true;
        }
        let key = DataKey::new(ResourceKind::Effect, path);
        let registered = self.data.add_ref(&key) || self.acquire_data(&key).is_some();
        if registered {
            self.registered_effects.insert(path.to_string());
            debug!(path, "Effect registered");
        }
        registered
    }

    // ------------------------------------------------------------------
    // Theme changes
    // ------------------------------------------------------------------

    /// Switch the active theme. Returns false when nothing changed.
    pub fn select_theme(&mut self, name: &str) -> ServerResult<bool> {
        let name = name.trim();
        if name == self.roots.active_theme() {
            debug!(theme = name, "Theme already active");
            return Ok(false);
        }
        if !self.roots.theme_exists(name) {
            warn!(theme = name, "Ignoring selection of a theme that is not installed");
            return Ok(false);
        }

        let previous = self.roots.active_theme().to_string();
        self.roots.set_active_theme(name);
        let generation = match self.reset_all() {
            Ok(generation) => generation,
            Err(e) => {
                warn!(theme = name, error = %e, "Theme switch failed, keeping {}", previous);
                self.roots.set_active_theme(&previous);
                if let Err(e) = self.reset_all() {
                    error!(theme = %previous, error = %e, "Failed to restore theme indexes");
                }
                return Err(e);
            }
        };
        self.persist_theme();
        info!(theme = name, generation, "Theme selected");
        Ok(true)
    }

    fn persist_theme(&self) {
        let Some(path) = &self.settings_path else {
            return;
        };
        let settings = ThemeSettings {
            theme: Some(self.roots.active_theme().to_string()),
        };
        if let Err(e) = settings.save(path) {
            warn!(path = %path.display(), error = %e, "Failed to persist theme selection");
        }
    }

    /// Drop every cached resource and session reference, reset the arena and
    /// rebuild the theme indexes.
    fn reset_all(&mut self) -> ServerResult<u64> {
        self.icons.drain();
        self.data.drain();
        self.composites.clear();
        self.composite_pieces.clear();
        self.registered_effects.clear();
        for refs in self.sessions.values_mut() {
            refs.held.clear();
        }
        let generation = self.arena.reset()?;
        build_theme_indexes(&self.roots, &mut self.arena)?;
        Ok(generation)
    }

    /// Invalidate resources built from changed files. An empty list
    /// invalidates everything.
    pub fn content_update(&mut self, files: &[String]) -> ServerResult<()> {
        if files.is_empty() {
            let generation = self.reset_all()?;
            info!(generation, "All theme content invalidated");
            return Ok(());
        }

        for file in files {
            let pieces = &self.composite_pieces;
            let icons = self.icons.keys_where(|id| {
                matches_file(&id.path, file)
                    || pieces
                        .get(id)
                        .is_some_and(|names| names.iter().any(|name| matches_file(name, file)))
            });
            let data = self.data.keys_where(|key| matches_file(&key.name, file));
            let dropped = icons.len() + data.len();

            for id in icons {
                self.forget(&Held::Icon(id.clone()));
                if let Some(info) = self.icons.remove(&id) {
                    self.free_icon(info);
                }
                self.forget_composite(&id);
            }
            for key in data {
                self.forget(&Held::Data(key.clone()));
                if key.kind == ResourceKind::Effect {
                    self.registered_effects.remove(&key.name);
                }
                if let Some(handle) = self.data.remove(&key) {
                    self.free_ref(handle);
                }
            }
            debug!(file = %file, dropped, "Content updated");
        }
        Ok(())
    }

    fn forget(&mut self, item: &Held) {
        for refs in self.sessions.values_mut() {
            refs.held.remove(item);
        }
    }

    // ------------------------------------------------------------------
    // Memory, rendering mode, diagnostics
    // ------------------------------------------------------------------

    pub fn free_shared_memory(&self) -> i64 {
        self.arena.free_bytes(ArenaKind::Shared) as i64
    }

    pub fn allocated_shared_memory(&self) -> i64 {
        self.arena.allocated_bytes(ArenaKind::Shared) as i64
    }

    pub fn allocated_heap_memory(&self) -> i64 {
        self.arena.allocated_bytes(ArenaKind::Heap) as i64
    }

    pub fn set_rendering_mode(&mut self, mode: RenderingMode) {
        if self.rendering_mode != mode {
            info!(?mode, "Rendering mode switched");
        }
        self.rendering_mode = mode;
    }

    pub fn diagnostics(&mut self, request: DiagRequest) -> DiagReply {
        let stats = self.icons.stats();
        match request {
            DiagRequest::CacheIconCount => DiagReply::Count(self.icons.len() as i64),
            DiagRequest::CacheHitCount => DiagReply::Count(stats.hits as i64),
            DiagRequest::CacheMissCount => DiagReply::Count(stats.misses as i64),
            DiagRequest::LastAddedRefCount => DiagReply::Count(i64::from(stats.last_added_refcount)),
            DiagRequest::LastRemovedRefCount => {
                DiagReply::Count(i64::from(stats.last_removed_refcount))
            }
            DiagRequest::EnableCache(enabled) => {
                let icons = self.icons.set_retain_unused(enabled);
                let data = self.data.set_retain_unused(enabled);
                for info in icons {
                    self.free_icon(info);
                }
                for handle in data {
                    self.free_ref(handle);
                }
                info!(enabled, "Retention of unused entries switched");
                DiagReply::Ack
            }
            DiagRequest::CleanCache => {
                self.reclaim_unused();
                DiagReply::Ack
            }
        }
    }
}

fn is_out_of_memory<T>(result: &ResourceResult<T>) -> bool {
    matches!(
        result,
        Err(ResourceError::Arena(ArenaError::OutOfMemory { .. }))
    )
}

/// Whether a cached logical name was built from `file`.
fn matches_file(logical: &str, file: &str) -> bool {
    if logical == file {
        return true;
    }
    let logical = Path::new(logical);
    let file = Path::new(file);
    let Some(file_name) = file.file_name() else {
        return false;
    };
    logical.file_name() == Some(file_name)
        || (logical.extension().is_none() && logical.file_name() == file.file_stem())
}
