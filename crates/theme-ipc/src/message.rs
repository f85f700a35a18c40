//! Typed requests, replies and notifications.
//!
//! Each request variant maps to one [`CoreOpcode`]; replies are decoded
//! against the opcode of the request they answer, so a reply whose shape
//! does not match is rejected instead of misread.

use crate::codec::{Wire, WireReader, WireWriter};
use crate::error::{IpcError, IpcResult};
use crate::frame::{Frame, FrameKind};
use crate::opcode::{CoreOpcode, DiagOpcode, ProtocolId};
use crate::types::{
    get_color, piece_count, put_color, ArenaRef, AspectRatioMode, IconId, IconKey, IconMode,
    LayerPriority, RectF, RenderingMode, Rgba, SharedIconInfo, SizeF, BATCH_SIZE_LIMIT,
    MAX_PIECES,
};

/// A multi-part (frame) icon: pieces composed into one composite table.
///
/// `key.id.path` is the composite id. The piece lists hold exactly
/// [`piece_count`] entries.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPartIconRequest {
    pub key: IconKey,
    pub pieces: Vec<String>,
    pub source_rects: Vec<RectF>,
    pub target_rects: Vec<RectF>,
    pub piece_sizes: Vec<SizeF>,
}

impl MultiPartIconRequest {
    /// Build a request, keeping only as many pieces as the composite id
    /// stands for.
    pub fn new(
        key: IconKey,
        mut pieces: Vec<String>,
        mut source_rects: Vec<RectF>,
        mut target_rects: Vec<RectF>,
        mut piece_sizes: Vec<SizeF>,
    ) -> IpcResult<Self> {
        let count = piece_count(&key.id.path);
        if pieces.len() < count
            || source_rects.len() < count
            || target_rects.len() < count
            || piece_sizes.len() < count
        {
            return Err(IpcError::Protocol(format!(
                "multi-part icon {} needs {} pieces",
                key.id.path, count
            )));
        }
        pieces.truncate(count);
        source_rects.truncate(count);
        target_rects.truncate(count);
        piece_sizes.truncate(count);
        Ok(Self {
            key,
            pieces,
            source_rects,
            target_rects,
            piece_sizes,
        })
    }

    pub fn composite_id(&self) -> &str {
        &self.key.id.path
    }

    fn validate(&self) -> IpcResult<()> {
        let count = piece_count(self.composite_id());
        let lens = [
            self.pieces.len(),
            self.source_rects.len(),
            self.target_rects.len(),
            self.piece_sizes.len(),
        ];
        if count > MAX_PIECES || lens.iter().any(|len| *len != count) {
            return Err(IpcError::Protocol(format!(
                "multi-part icon {} expects {} pieces, got {:?}",
                self.composite_id(),
                count,
                lens
            )));
        }
        Ok(())
    }

    /// Lookup key of piece `index`, sharing the composite's parameters.
    pub fn piece_key(&self, index: usize) -> Option<IconKey> {
        let path = self.pieces.get(index)?;
        let size = *self.piece_sizes.get(index)?;
        let mut key = self.key.clone();
        key.id.path = path.clone();
        key.id.size = size;
        Some(key)
    }
}

/// Several icons sharing one set of parameters, answered in order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiIconRequest {
    pub paths: Vec<String>,
    pub sizes: Vec<SizeF>,
    pub aspect: AspectRatioMode,
    pub mode: IconMode,
    pub mirrored: bool,
    pub options: u32,
    pub color: Option<Rgba>,
    pub render_mode: RenderingMode,
}

impl MultiIconRequest {
    /// One lookup key per listed icon.
    pub fn keys(&self) -> Vec<IconKey> {
        self.paths
            .iter()
            .zip(self.sizes.iter())
            .map(|(path, size)| IconKey {
                id: IconId {
                    path: path.clone(),
                    size: *size,
                    aspect: self.aspect,
                    mode: self.mode,
                    mirrored: self.mirrored,
                    color: self.color,
                    render_mode: self.render_mode,
                },
                options: self.options,
            })
            .collect()
    }

    fn encode_with(&self, w: &mut WireWriter, with_options: bool) {
        w.put_seq(&self.paths);
        w.put_seq(&self.sizes);
        w.put(&self.aspect);
        w.put(&self.mode);
        w.put_bool(self.mirrored);
        if with_options {
            w.put_u32(self.options);
        }
        put_color(w, self.color);
        w.put(&self.render_mode);
    }

    fn decode_with(r: &mut WireReader<'_>, with_options: bool) -> IpcResult<Self> {
        let paths: Vec<String> = r.get_seq()?;
        let sizes: Vec<SizeF> = r.get_seq()?;
        if paths.len() != sizes.len() {
            return Err(IpcError::Protocol(format!(
                "{} icon paths but {} sizes",
                paths.len(),
                sizes.len()
            )));
        }
        let aspect = r.get()?;
        let mode = r.get()?;
        let mirrored = r.get_bool()?;
        let options = if with_options { r.get_u32()? } else { 0 };
        Ok(Self {
            paths,
            sizes,
            aspect,
            mode,
            mirrored,
            options,
            color: get_color(r)?,
            render_mode: r.get()?,
        })
    }
}

/// A core protocol request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Handshake { version: u32 },
    IconLookup(IconKey),
    MultiPartIconLookup(MultiPartIconRequest),
    MultiIconLookup(MultiIconRequest),
    StyleSheetLookup { path: String, priority: LayerPriority },
    WidgetLayoutLookup { file: String, layout: String, section: String },
    DeviceProfileLookup,
    TypefaceTableLookup,
    EffectLookup { path: String },
    EffectAdd { path: String },
    UnloadIcon(IconId),
    UnloadMultiIcon(MultiIconRequest),
    /// Always encoded as exactly [`BATCH_SIZE_LIMIT`] keys, padded with
    /// empty ones.
    BatchUnloadIcon(Vec<IconId>),
    ThemeSelection { name: String },
    ThemeContentUpdate { files: Vec<String> },
    ForegroundLost,
    FreeSharedMemory,
    AllocatedSharedMemory,
    AllocatedHeapMemory,
    SwitchRenderingMode(RenderingMode),
    ServerStop,
}

impl Request {
    pub fn opcode(&self) -> CoreOpcode {
        match self {
            Self::Handshake { .. } => CoreOpcode::Handshake,
            Self::IconLookup(_) => CoreOpcode::IconLookup,
            Self::MultiPartIconLookup(_) => CoreOpcode::MultiPartIconLookup,
            Self::MultiIconLookup(_) => CoreOpcode::MultiIconLookup,
            Self::StyleSheetLookup { .. } => CoreOpcode::StyleSheetLookup,
            Self::WidgetLayoutLookup { .. } => CoreOpcode::WidgetLayoutLookup,
            Self::DeviceProfileLookup => CoreOpcode::DeviceProfileLookup,
            Self::TypefaceTableLookup => CoreOpcode::TypefaceTableLookup,
            Self::EffectLookup { .. } => CoreOpcode::EffectLookup,
            Self::EffectAdd { .. } => CoreOpcode::EffectAdd,
            Self::UnloadIcon(_) => CoreOpcode::UnloadIcon,
            Self::UnloadMultiIcon(_) => CoreOpcode::UnloadMultiIcon,
            Self::BatchUnloadIcon(_) => CoreOpcode::BatchUnloadIcon,
            Self::ThemeSelection { .. } => CoreOpcode::ThemeSelection,
            Self::ThemeContentUpdate { .. } => CoreOpcode::ThemeContentUpdate,
            Self::ForegroundLost => CoreOpcode::ForegroundLost,
            Self::FreeSharedMemory => CoreOpcode::FreeSharedMemory,
            Self::AllocatedSharedMemory => CoreOpcode::AllocatedSharedMemory,
            Self::AllocatedHeapMemory => CoreOpcode::AllocatedHeapMemory,
            Self::SwitchRenderingMode(_) => CoreOpcode::SwitchRenderingMode,
            Self::ServerStop => CoreOpcode::ServerStop,
        }
    }

    /// Whether the server answers this request.
    pub fn expects_reply(&self) -> bool {
        Self::expects_reply_to(self.opcode())
    }

    /// `ThemeSelection` and `ForegroundLost` are fire-and-forget.
    pub fn expects_reply_to(opcode: CoreOpcode) -> bool {
        !matches!(
            opcode,
            CoreOpcode::ThemeSelection | CoreOpcode::ForegroundLost
        )
    }

    /// Split `ids` into batch unload requests of at most
    /// [`BATCH_SIZE_LIMIT`] keys each.
    pub fn batch_unload(ids: &[IconId]) -> Vec<Request> {
        ids.chunks(BATCH_SIZE_LIMIT)
            .map(|chunk| Request::BatchUnloadIcon(chunk.to_vec()))
            .collect()
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        match self {
            Self::Handshake { version } => w.put_u32(*version),
            Self::IconLookup(key) => w.put(key),
            Self::MultiPartIconLookup(req) => {
                let id = &req.key.id;
                w.put_seq(&req.pieces);
                w.put_str(&id.path);
                w.put_seq(&req.source_rects);
                w.put_seq(&req.target_rects);
                w.put_seq(&req.piece_sizes);
                w.put(&id.size);
                w.put(&id.aspect);
                w.put(&id.mode);
                w.put_bool(id.mirrored);
                w.put_u32(req.key.options);
                put_color(&mut w, id.color);
                w.put(&id.render_mode);
            }
            Self::MultiIconLookup(req) => req.encode_with(&mut w, true),
            Self::StyleSheetLookup { path, priority } => {
                w.put_str(path);
                w.put(priority);
            }
            Self::WidgetLayoutLookup {
                file,
                layout,
                section,
            } => {
                w.put_str(file);
                w.put_str(layout);
                w.put_str(section);
            }
            Self::EffectLookup { path } | Self::EffectAdd { path } => w.put_str(path),
            Self::UnloadIcon(id) => w.put(id),
            Self::UnloadMultiIcon(req) => req.encode_with(&mut w, false),
            Self::BatchUnloadIcon(ids) => {
                let padding = IconId::default();
                for i in 0..BATCH_SIZE_LIMIT {
                    w.put(ids.get(i).unwrap_or(&padding));
                }
            }
            Self::ThemeSelection { name } => w.put_str(name),
            Self::ThemeContentUpdate { files } => w.put_seq(files),
            Self::SwitchRenderingMode(mode) => w.put(mode),
            Self::DeviceProfileLookup
            | Self::TypefaceTableLookup
            | Self::ForegroundLost
            | Self::FreeSharedMemory
            | Self::AllocatedSharedMemory
            | Self::AllocatedHeapMemory
            | Self::ServerStop => {}
        }
        w.into_bytes()
    }

    pub fn to_frame(&self, request_id: u64) -> Frame {
        Frame::request(
            ProtocolId::Core,
            self.opcode().as_u16(),
            request_id,
            self.encode_body(),
        )
    }

    pub fn decode(opcode: CoreOpcode, body: &[u8]) -> IpcResult<Self> {
        let mut r = WireReader::new(body);
        let request = match opcode {
            CoreOpcode::Handshake => Self::Handshake {
                version: r.get_u32()?,
            },
            CoreOpcode::IconLookup => Self::IconLookup(r.get()?),
            CoreOpcode::MultiPartIconLookup => {
                let pieces = r.get_seq()?;
                let composite_id = r.get_str()?;
                let source_rects = r.get_seq()?;
                let target_rects = r.get_seq()?;
                let piece_sizes = r.get_seq()?;
                let size = r.get()?;
                let aspect = r.get()?;
                let mode = r.get()?;
                let mirrored = r.get_bool()?;
                let options = r.get_u32()?;
                let color = get_color(&mut r)?;
                let render_mode = r.get()?;
                let req = MultiPartIconRequest {
                    key: IconKey {
                        id: IconId {
                            path: composite_id,
                            size,
                            aspect,
                            mode,
                            mirrored,
                            color,
                            render_mode,
                        },
                        options,
                    },
                    pieces,
                    source_rects,
                    target_rects,
                    piece_sizes,
                };
                req.validate()?;
                Self::MultiPartIconLookup(req)
            }
            CoreOpcode::MultiIconLookup => {
                Self::MultiIconLookup(MultiIconRequest::decode_with(&mut r, true)?)
            }
            CoreOpcode::StyleSheetLookup => Self::StyleSheetLookup {
                path: r.get_str()?,
                priority: r.get()?,
            },
            CoreOpcode::WidgetLayoutLookup => Self::WidgetLayoutLookup {
                file: r.get_str()?,
                layout: r.get_str()?,
                section: r.get_str()?,
            },
            CoreOpcode::DeviceProfileLookup => Self::DeviceProfileLookup,
            CoreOpcode::TypefaceTableLookup => Self::TypefaceTableLookup,
            CoreOpcode::EffectLookup => Self::EffectLookup { path: r.get_str()? },
            CoreOpcode::EffectAdd => Self::EffectAdd { path: r.get_str()? },
            CoreOpcode::UnloadIcon => Self::UnloadIcon(r.get()?),
            CoreOpcode::UnloadMultiIcon => {
                Self::UnloadMultiIcon(MultiIconRequest::decode_with(&mut r, false)?)
            }
            CoreOpcode::BatchUnloadIcon => {
                let mut ids = Vec::with_capacity(BATCH_SIZE_LIMIT);
                for _ in 0..BATCH_SIZE_LIMIT {
                    ids.push(r.get()?);
                }
                Self::BatchUnloadIcon(ids)
            }
            CoreOpcode::ThemeSelection => Self::ThemeSelection { name: r.get_str()? },
            CoreOpcode::ThemeContentUpdate => Self::ThemeContentUpdate {
                files: r.get_seq()?,
            },
            CoreOpcode::ForegroundLost => Self::ForegroundLost,
            CoreOpcode::FreeSharedMemory => Self::FreeSharedMemory,
            CoreOpcode::AllocatedSharedMemory => Self::AllocatedSharedMemory,
            CoreOpcode::AllocatedHeapMemory => Self::AllocatedHeapMemory,
            CoreOpcode::SwitchRenderingMode => Self::SwitchRenderingMode(r.get()?),
            CoreOpcode::ServerStop => Self::ServerStop,
        };
        r.finish()?;
        Ok(request)
    }

    /// Decode a request frame.
    pub fn from_frame(frame: &Frame) -> IpcResult<Self> {
        if frame.kind != FrameKind::Request || frame.protocol != ProtocolId::Core {
            return Err(IpcError::Protocol(format!(
                "expected core request frame, got {:?}/{:?}",
                frame.kind, frame.protocol
            )));
        }
        Self::decode(CoreOpcode::from_u16(frame.opcode)?, &frame.body)
    }
}

/// Handshake reply record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub protocol_version: u32,
    pub arena_name: String,
    pub arena_size: u64,
    pub generation: u64,
    /// Currently selected theme.
    pub theme: String,
}

impl Wire for HandshakeInfo {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.protocol_version);
        w.put_str(&self.arena_name);
        w.put_u64(self.arena_size);
        w.put_u64(self.generation);
        w.put_str(&self.theme);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        Ok(Self {
            protocol_version: r.get_u32()?,
            arena_name: r.get_str()?,
            arena_size: r.get_u64()?,
            generation: r.get_u64()?,
            theme: r.get_str()?,
        })
    }
}

/// A core protocol reply. The shape is fixed by the request opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Handshake(HandshakeInfo),
    /// Icon and multi-part icon lookups.
    Icon(SharedIconInfo),
    /// Multi-icon lookup, one entry per requested icon.
    IconList(Vec<SharedIconInfo>),
    /// Stylesheet, layout, device profile, typeface table and effect
    /// lookups. `None` when not found.
    Resource(Option<ArenaRef>),
    /// Memory queries.
    Quantity(i64),
    /// Effect registration and server stop.
    Flag(bool),
    /// Unloads, content updates and rendering mode switches.
    Ack,
}

impl Reply {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        match self {
            Self::Handshake(info) => w.put(info),
            Self::Icon(info) => w.put(info),
            Self::IconList(infos) => w.put_seq(infos),
            Self::Resource(handle) => {
                w.put(&handle.unwrap_or(ArenaRef::new(-1, 0, 0)));
            }
            Self::Quantity(v) => w.put_i64(*v),
            Self::Flag(v) => w.put_bool(*v),
            Self::Ack => {}
        }
        w.into_bytes()
    }

    /// Decode the reply to a request with `opcode`.
    pub fn decode(opcode: CoreOpcode, body: &[u8]) -> IpcResult<Self> {
        let mut r = WireReader::new(body);
        let reply = match opcode {
            CoreOpcode::Handshake => Self::Handshake(r.get()?),
            CoreOpcode::IconLookup | CoreOpcode::MultiPartIconLookup => Self::Icon(r.get()?),
            CoreOpcode::MultiIconLookup => Self::IconList(r.get_seq()?),
            CoreOpcode::StyleSheetLookup
            | CoreOpcode::WidgetLayoutLookup
            | CoreOpcode::DeviceProfileLookup
            | CoreOpcode::TypefaceTableLookup
            | CoreOpcode::EffectLookup => {
                let handle: ArenaRef = r.get()?;
                Self::Resource(handle.is_valid().then_some(handle))
            }
            CoreOpcode::FreeSharedMemory
            | CoreOpcode::AllocatedSharedMemory
            | CoreOpcode::AllocatedHeapMemory => Self::Quantity(r.get_i64()?),
            CoreOpcode::EffectAdd | CoreOpcode::ServerStop => Self::Flag(r.get_bool()?),
            CoreOpcode::UnloadIcon
            | CoreOpcode::UnloadMultiIcon
            | CoreOpcode::BatchUnloadIcon
            | CoreOpcode::ThemeContentUpdate
            | CoreOpcode::SwitchRenderingMode => Self::Ack,
            CoreOpcode::ThemeSelection | CoreOpcode::ForegroundLost => {
                return Err(IpcError::Protocol(format!(
                    "{:?} has no reply",
                    opcode
                )));
            }
        };
        r.finish()?;
        Ok(reply)
    }

    /// Decode a reply frame, checking it answers `opcode`.
    pub fn from_frame(opcode: CoreOpcode, frame: &Frame) -> IpcResult<Self> {
        if frame.kind != FrameKind::Reply
            || frame.protocol != ProtocolId::Core
            || frame.opcode != opcode.as_u16()
        {
            return Err(IpcError::Protocol(format!(
                "reply {:?}/{:?}/{} does not answer {:?}",
                frame.kind, frame.protocol, frame.opcode, opcode
            )));
        }
        Self::decode(opcode, &frame.body)
    }
}

/// Server-initiated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ThemeChanged(String),
    ThemeContentUpdated(Vec<String>),
}

impl Notification {
    pub fn opcode(&self) -> CoreOpcode {
        match self {
            Self::ThemeChanged(_) => CoreOpcode::ThemeSelection,
            Self::ThemeContentUpdated(_) => CoreOpcode::ThemeContentUpdate,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut w = WireWriter::new();
        match self {
            Self::ThemeChanged(name) => w.put_str(name),
            Self::ThemeContentUpdated(files) => w.put_seq(files),
        }
        Frame::notification(self.opcode().as_u16(), w.into_bytes())
    }

    pub fn from_frame(frame: &Frame) -> IpcResult<Self> {
        if frame.kind != FrameKind::Notification {
            return Err(IpcError::Protocol(format!(
                "expected notification frame, got {:?}",
                frame.kind
            )));
        }
        let mut r = WireReader::new(&frame.body);
        let notification = match CoreOpcode::from_u16(frame.opcode)? {
            CoreOpcode::ThemeSelection => Self::ThemeChanged(r.get_str()?),
            CoreOpcode::ThemeContentUpdate => Self::ThemeContentUpdated(r.get_seq()?),
            other => {
                return Err(IpcError::Protocol(format!(
                    "{:?} is not a notification",
                    other
                )));
            }
        };
        r.finish()?;
        Ok(notification)
    }
}

/// A diagnostics protocol request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagRequest {
    CacheIconCount,
    CacheHitCount,
    CacheMissCount,
    LastAddedRefCount,
    LastRemovedRefCount,
    EnableCache(bool),
    CleanCache,
}

impl DiagRequest {
    pub fn opcode(&self) -> DiagOpcode {
        match self {
            Self::CacheIconCount => DiagOpcode::CacheIconCount,
            Self::CacheHitCount => DiagOpcode::CacheHitCount,
            Self::CacheMissCount => DiagOpcode::CacheMissCount,
            Self::LastAddedRefCount => DiagOpcode::LastAddedRefCount,
            Self::LastRemovedRefCount => DiagOpcode::LastRemovedRefCount,
            Self::EnableCache(_) => DiagOpcode::EnableCache,
            Self::CleanCache => DiagOpcode::CleanCache,
        }
    }

    pub fn to_frame(&self, request_id: u64) -> Frame {
        let mut w = WireWriter::new();
        if let Self::EnableCache(enabled) = self {
            w.put_bool(*enabled);
        }
        Frame::request(
            ProtocolId::Diagnostics,
            self.opcode().as_u16(),
            request_id,
            w.into_bytes(),
        )
    }

    pub fn from_frame(frame: &Frame) -> IpcResult<Self> {
        let mut r = WireReader::new(&frame.body);
        let request = match DiagOpcode::from_u16(frame.opcode)? {
            DiagOpcode::CacheIconCount => Self::CacheIconCount,
            DiagOpcode::CacheHitCount => Self::CacheHitCount,
            DiagOpcode::CacheMissCount => Self::CacheMissCount,
            DiagOpcode::LastAddedRefCount => Self::LastAddedRefCount,
            DiagOpcode::LastRemovedRefCount => Self::LastRemovedRefCount,
            DiagOpcode::EnableCache => Self::EnableCache(r.get_bool()?),
            DiagOpcode::CleanCache => Self::CleanCache,
        };
        r.finish()?;
        Ok(request)
    }
}

/// A diagnostics reply. The first body byte is 1 when served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagReply {
    Count(i64),
    Ack,
    /// Diagnostics are disabled on this server.
    Unsupported,
}

impl DiagReply {
    pub fn encode_body(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        match self {
            Self::Count(v) => {
                w.put_bool(true);
                w.put_i64(*v);
            }
            Self::Ack => w.put_bool(true),
            Self::Unsupported => w.put_bool(false),
        }
        w.into_bytes()
    }

    pub fn decode(opcode: DiagOpcode, body: &[u8]) -> IpcResult<Self> {
        let mut r = WireReader::new(body);
        if !r.get_bool()? {
            r.finish()?;
            return Ok(Self::Unsupported);
        }
        let reply = match opcode {
            DiagOpcode::EnableCache | DiagOpcode::CleanCache => Self::Ack,
            _ => Self::Count(r.get_i64()?),
        };
        r.finish()?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> IconKey {
        IconKey::new(IconId::new(path, SizeF::new(24.0, 24.0)))
    }

    fn decode_request(request: &Request) -> Request {
        Request::from_frame(&request.to_frame(1)).unwrap()
    }

    #[test]
    fn test_icon_lookup_request() {
        let mut k = key("qtg_mono_back");
        k.id.color = Some(Rgba(0x00ff00ff));
        k.id.render_mode = RenderingMode::Hardware;
        k.options = 3;
        let request = Request::IconLookup(k);
        assert_eq!(decode_request(&request), request);
    }

    #[test]
    fn test_multi_part_truncates_to_piece_count() {
        let pieces: Vec<String> = (0..9).map(|i| format!("qtg_fr_btn_{}", i)).collect();
        let rects = vec![RectF::new(0.0, 0.0, 4.0, 4.0); 9];
        let sizes = vec![SizeF::new(4.0, 4.0); 9];
        let req = MultiPartIconRequest::new(
            key("qtg_fr_btn_3PH"),
            pieces,
            rects.clone(),
            rects,
            sizes,
        )
        .unwrap();
        assert_eq!(req.pieces.len(), 3);
        assert_eq!(req.source_rects.len(), 3);
        assert_eq!(req.target_rects.len(), 3);
        assert_eq!(req.piece_sizes.len(), 3);

        let request = Request::MultiPartIconLookup(req);
        assert_eq!(decode_request(&request), request);
    }

    #[test]
    fn test_multi_part_too_few_pieces() {
        let result = MultiPartIconRequest::new(
            key("qtg_fr_popup_9P"),
            vec!["a".into()],
            vec![RectF::default()],
            vec![RectF::default()],
            vec![SizeF::default()],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_multi_part_decode_rejects_mismatched_counts() {
        let req = MultiPartIconRequest {
            key: key("qtg_fr_btn_3PV"),
            pieces: vec!["a".into()],
            source_rects: vec![RectF::default()],
            target_rects: vec![RectF::default()],
            piece_sizes: vec![SizeF::default()],
        };
        let frame = Request::MultiPartIconLookup(req).to_frame(1);
        assert!(Request::from_frame(&frame).is_err());
    }

    #[test]
    fn test_piece_key_inherits_parameters() {
        let mut composite = key("qtg_fr_btn_3PV");
        composite.id.mirrored = true;
        let req = MultiPartIconRequest::new(
            composite,
            vec!["t".into(), "c".into(), "b".into()],
            vec![RectF::default(); 3],
            vec![RectF::default(); 3],
            vec![SizeF::new(1.0, 1.0), SizeF::new(2.0, 2.0), SizeF::new(3.0, 3.0)],
        )
        .unwrap();
        let piece = req.piece_key(1).unwrap();
        assert_eq!(piece.id.path, "c");
        assert_eq!(piece.id.size, SizeF::new(2.0, 2.0));
        assert!(piece.id.mirrored);
        assert!(req.piece_key(3).is_none());
    }

    #[test]
    fn test_batch_unload_pads_to_limit() {
        let ids = vec![IconId::new("a", SizeF::new(1.0, 1.0))];
        let frame = Request::BatchUnloadIcon(ids).to_frame(5);
        match Request::from_frame(&frame).unwrap() {
            Request::BatchUnloadIcon(decoded) => {
                assert_eq!(decoded.len(), BATCH_SIZE_LIMIT);
                assert_eq!(decoded[0].path, "a");
                assert!(decoded[1..].iter().all(IconId::is_padding));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_batch_unload_chunks() {
        let ids: Vec<IconId> = (0..70)
            .map(|i| IconId::new(format!("icon{}", i), SizeF::default()))
            .collect();
        let batches = Request::batch_unload(&ids);
        assert_eq!(batches.len(), 3);
        match &batches[2] {
            Request::BatchUnloadIcon(chunk) => assert_eq!(chunk.len(), 6),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unload_multi_omits_options() {
        let req = MultiIconRequest {
            paths: vec!["a".into(), "b".into()],
            sizes: vec![SizeF::new(1.0, 1.0), SizeF::new(2.0, 2.0)],
            aspect: AspectRatioMode::Keep,
            mode: IconMode::Normal,
            mirrored: false,
            options: 0,
            color: None,
            render_mode: RenderingMode::Software,
        };
        let lookup = Request::MultiIconLookup(req.clone()).encode_body();
        let unload = Request::UnloadMultiIcon(req.clone()).encode_body();
        assert_eq!(lookup.len(), unload.len() + 4);
        assert_eq!(
            decode_request(&Request::UnloadMultiIcon(req.clone())),
            Request::UnloadMultiIcon(req)
        );
    }

    #[test]
    fn test_multi_icon_keys() {
        let req = MultiIconRequest {
            paths: vec!["a".into(), "b".into()],
            sizes: vec![SizeF::new(1.0, 1.0), SizeF::new(2.0, 2.0)],
            aspect: AspectRatioMode::Ignore,
            mode: IconMode::Selected,
            mirrored: true,
            options: 9,
            color: Some(Rgba(1)),
            render_mode: RenderingMode::Hardware,
        };
        let keys = req.keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[1].id.path, "b");
        assert_eq!(keys[1].id.mode, IconMode::Selected);
        assert_eq!(keys[1].options, 9);
    }

    #[test]
    fn test_no_reply_opcodes() {
        assert!(!Request::ThemeSelection { name: "x".into() }.expects_reply());
        assert!(!Request::ForegroundLost.expects_reply());
        assert!(Request::ServerStop.expects_reply());
        assert!(Reply::decode(CoreOpcode::ThemeSelection, &[]).is_err());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut body = Request::EffectLookup { path: "a".into() }.encode_body();
        body.push(0);
        assert!(Request::decode(CoreOpcode::EffectLookup, &body).is_err());
    }

    #[test]
    fn test_resource_reply_not_found() {
        let body = Reply::Resource(None).encode_body();
        assert_eq!(
            Reply::decode(CoreOpcode::StyleSheetLookup, &body).unwrap(),
            Reply::Resource(None)
        );

        let handle = ArenaRef::new(256, 12, 4);
        let body = Reply::Resource(Some(handle)).encode_body();
        assert_eq!(
            Reply::decode(CoreOpcode::EffectLookup, &body).unwrap(),
            Reply::Resource(Some(handle))
        );
    }

    #[test]
    fn test_empty_reply_body_is_mismatch_for_lookups() {
        assert!(Reply::decode(CoreOpcode::IconLookup, &[]).is_err());
        assert!(Reply::decode(CoreOpcode::StyleSheetLookup, &[]).is_err());
        assert_eq!(Reply::decode(CoreOpcode::UnloadIcon, &[]).unwrap(), Reply::Ack);
    }

    #[test]
    fn test_reply_frame_opcode_mismatch() {
        let request = Request::IconLookup(key("a")).to_frame(3);
        let mut reply = Frame::reply_to(&request, Reply::Icon(SharedIconInfo::Invalid).encode_body());
        assert!(Reply::from_frame(CoreOpcode::IconLookup, &reply).is_ok());
        reply.opcode = CoreOpcode::EffectLookup.as_u16();
        assert!(Reply::from_frame(CoreOpcode::IconLookup, &reply).is_err());
    }

    #[test]
    fn test_notification_frames() {
        let changed = Notification::ThemeChanged("sfblacktheme".into());
        let frame = changed.to_frame();
        assert_eq!(frame.request_id, 0);
        assert_eq!(Notification::from_frame(&frame).unwrap(), changed);

        let updated = Notification::ThemeContentUpdated(vec!["a.css".into()]);
        assert_eq!(Notification::from_frame(&updated.to_frame()).unwrap(), updated);

        let not_a_notification = Frame::notification(CoreOpcode::IconLookup.as_u16(), vec![]);
        assert!(Notification::from_frame(&not_a_notification).is_err());
    }

    #[test]
    fn test_diag_unsupported() {
        let body = DiagReply::Unsupported.encode_body();
        assert_eq!(
            DiagReply::decode(DiagOpcode::CacheHitCount, &body).unwrap(),
            DiagReply::Unsupported
        );
        let body = DiagReply::Count(12).encode_body();
        assert_eq!(
            DiagReply::decode(DiagOpcode::CacheHitCount, &body).unwrap(),
            DiagReply::Count(12)
        );
    }

    #[test]
    fn test_diag_enable_cache_request() {
        let frame = DiagRequest::EnableCache(false).to_frame(2);
        assert_eq!(frame.protocol, ProtocolId::Diagnostics);
        assert_eq!(
            DiagRequest::from_frame(&frame).unwrap(),
            DiagRequest::EnableCache(false)
        );
    }
}
