//! Resource keys and shared resource handles.

use crate::codec::{Wire, WireReader, WireWriter};
use crate::error::{IpcError, IpcResult};
use std::hash::{Hash, Hasher};

/// Maximum number of pieces in a multi-part icon.
pub const MAX_PIECES: usize = 9;

/// Number of keys carried by one batch unload request.
pub const BATCH_SIZE_LIMIT: usize = 32;

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

impl SizeF {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    fn bits(&self) -> (u32, u32) {
        (self.width.to_bits(), self.height.to_bits())
    }
}

impl Wire for SizeF {
    fn encode(&self, w: &mut WireWriter) {
        w.put_f32(self.width);
        w.put_f32(self.height);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        Ok(Self {
            width: r.get_f32()?,
            height: r.get_f32()?,
        })
    }
}

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

impl Wire for RectF {
    fn encode(&self, w: &mut WireWriter) {
        w.put_f32(self.x);
        w.put_f32(self.y);
        w.put_f32(self.width);
        w.put_f32(self.height);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        Ok(Self {
            x: r.get_f32()?,
            y: r.get_f32()?,
            width: r.get_f32()?,
            height: r.get_f32()?,
        })
    }
}

/// Packed 0xRRGGBBAA tint colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba(pub u32);

/// Optional colour: presence byte followed by the packed value.
pub(crate) fn put_color(w: &mut WireWriter, color: Option<Rgba>) {
    match color {
        Some(Rgba(v)) => {
            w.put_bool(true);
            w.put_u32(v);
        }
        None => w.put_bool(false),
    }
}

pub(crate) fn get_color(r: &mut WireReader<'_>) -> IpcResult<Option<Rgba>> {
    if r.get_bool()? {
        Ok(Some(Rgba(r.get_u32()?)))
    } else {
        Ok(None)
    }
}

/// Declares a `u8`-tagged enum with its wire conversion.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(u8)]
        pub enum $name {
            #[default]
            $($variant = $value),+
        }

        impl TryFrom<u8> for $name {
            type Error = IpcError;

            fn try_from(value: u8) -> IpcResult<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(IpcError::Protocol(format!(
                        "invalid {} value {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl Wire for $name {
            fn encode(&self, w: &mut WireWriter) {
                w.put_u8(*self as u8);
            }

            fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
                Self::try_from(r.get_u8()?)
            }
        }
    };
}

wire_enum!(
    /// How an icon is scaled into the requested size.
    AspectRatioMode { Ignore = 0, Keep = 1, KeepByExpanding = 2 }
);

wire_enum!(
    /// Visual state the icon is rendered for.
    IconMode { Normal = 0, Disabled = 1, Active = 2, Selected = 3 }
);

wire_enum!(
    /// Rendering backend the resource is produced for.
    RenderingMode { Software = 0, Hardware = 1 }
);

wire_enum!(
    /// Stylesheet layer, lowest precedence first.
    LayerPriority { Core = 0, Theme = 1, AppTheme = 2, Application = 3, Operator = 4 }
);

/// Identity of an icon in the server cache. Also the unload key.
///
/// An empty path marks a padding entry in a batch unload.
#[derive(Debug, Clone, Default)]
pub struct IconId {
    pub path: String,
    pub size: SizeF,
    pub aspect: AspectRatioMode,
    pub mode: IconMode,
    pub mirrored: bool,
    pub color: Option<Rgba>,
    pub render_mode: RenderingMode,
}

impl IconId {
    pub fn new(path: impl Into<String>, size: SizeF) -> Self {
        Self {
            path: path.into(),
            size,
            ..Self::default()
        }
    }

    pub fn is_padding(&self) -> bool {
        self.path.is_empty()
    }
}

// f32 fields compare by bit pattern so the id can key a HashMap.
impl PartialEq for IconId {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.size.bits() == other.size.bits()
            && self.aspect == other.aspect
            && self.mode == other.mode
            && self.mirrored == other.mirrored
            && self.color == other.color
            && self.render_mode == other.render_mode
    }
}

impl Eq for IconId {}

impl Hash for IconId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.size.bits().hash(state);
        self.aspect.hash(state);
        self.mode.hash(state);
        self.mirrored.hash(state);
        self.color.hash(state);
        self.render_mode.hash(state);
    }
}

impl Wire for IconId {
    fn encode(&self, w: &mut WireWriter) {
        w.put_str(&self.path);
        w.put(&self.size);
        w.put(&self.aspect);
        w.put(&self.mode);
        w.put_bool(self.mirrored);
        put_color(w, self.color);
        w.put(&self.render_mode);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        Ok(Self {
            path: r.get_str()?,
            size: r.get()?,
            aspect: r.get()?,
            mode: r.get()?,
            mirrored: r.get_bool()?,
            color: get_color(r)?,
            render_mode: r.get()?,
        })
    }
}

/// Full icon lookup key: identity plus loader options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IconKey {
    pub id: IconId,
    pub options: u32,
}

impl IconKey {
    pub fn new(id: IconId) -> Self {
        Self { id, options: 0 }
    }
}

// Field order: path, size, aspect, mode, mirrored, options, color, render mode.
impl Wire for IconKey {
    fn encode(&self, w: &mut WireWriter) {
        w.put_str(&self.id.path);
        w.put(&self.id.size);
        w.put(&self.id.aspect);
        w.put(&self.id.mode);
        w.put_bool(self.id.mirrored);
        w.put_u32(self.options);
        put_color(w, self.id.color);
        w.put(&self.id.render_mode);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        let path = r.get_str()?;
        let size = r.get()?;
        let aspect = r.get()?;
        let mode = r.get()?;
        let mirrored = r.get_bool()?;
        let options = r.get_u32()?;
        let color = get_color(r)?;
        let render_mode = r.get()?;
        Ok(Self {
            id: IconId {
                path,
                size,
                aspect,
                mode,
                mirrored,
                color,
                render_mode,
            },
            options,
        })
    }
}

/// Generation-tagged arena offset as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaRef {
    pub offset: i64,
    pub len: u32,
    pub generation: u64,
}

impl ArenaRef {
    pub fn new(offset: i64, len: u32, generation: u64) -> Self {
        Self {
            offset,
            len,
            generation,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.offset >= 0
    }
}

impl Wire for ArenaRef {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i64(self.offset);
        w.put_u32(self.len);
        w.put_u64(self.generation);
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        Ok(Self {
            offset: r.get_i64()?,
            len: r.get_u32()?,
            generation: r.get_u64()?,
        })
    }
}

/// Format tag of a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum IconFormat {
    Invalid = -1,
    Nvg = 0,
    Pic = 1,
    Svg = 2,
    PlatformSurface = 3,
    Blob = 4,
    Raster = 5,
}

impl TryFrom<i32> for IconFormat {
    type Error = IpcError;

    fn try_from(value: i32) -> IpcResult<Self> {
        Ok(match value {
            -1 => Self::Invalid,
            0 => Self::Nvg,
            1 => Self::Pic,
            2 => Self::Svg,
            3 => Self::PlatformSurface,
            4 => Self::Blob,
            5 => Self::Raster,
            other => {
                return Err(IpcError::Protocol(format!("invalid icon format {}", other)));
            }
        })
    }
}

/// A resource handle returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SharedIconInfo {
    /// Not found, or the request could not be served.
    #[default]
    Invalid,
    Raster {
        handle: ArenaRef,
        width: u32,
        height: u32,
        default_width: u32,
        default_height: u32,
        pixel_format: u32,
    },
    Pic {
        handle: ArenaRef,
        default_width: u32,
        default_height: u32,
    },
    Nvg {
        handle: ArenaRef,
    },
    Svg {
        handle: ArenaRef,
    },
    PlatformSurface {
        id: u64,
        width: u32,
        height: u32,
    },
    Blob {
        handle: ArenaRef,
    },
}

impl SharedIconInfo {
    pub fn format(&self) -> IconFormat {
        match self {
            Self::Invalid => IconFormat::Invalid,
            Self::Raster { .. } => IconFormat::Raster,
            Self::Pic { .. } => IconFormat::Pic,
            Self::Nvg { .. } => IconFormat::Nvg,
            Self::Svg { .. } => IconFormat::Svg,
            Self::PlatformSurface { .. } => IconFormat::PlatformSurface,
            Self::Blob { .. } => IconFormat::Blob,
        }
    }

    /// Arena reference, if the resource lives in the arena.
    pub fn handle(&self) -> Option<ArenaRef> {
        match self {
            Self::Raster { handle, .. }
            | Self::Pic { handle, .. }
            | Self::Nvg { handle }
            | Self::Svg { handle }
            | Self::Blob { handle } => Some(*handle),
            Self::Invalid | Self::PlatformSurface { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            Self::Invalid => false,
            Self::PlatformSurface { .. } => true,
            _ => self.handle().is_some_and(|h| h.is_valid()),
        }
    }
}

impl Wire for SharedIconInfo {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.format() as i32);
        match self {
            Self::Invalid => {}
            Self::Raster {
                handle,
                width,
                height,
                default_width,
                default_height,
                pixel_format,
            } => {
                w.put(handle);
                w.put_u32(*width);
                w.put_u32(*height);
                w.put_u32(*default_width);
                w.put_u32(*default_height);
                w.put_u32(*pixel_format);
            }
            Self::Pic {
                handle,
                default_width,
                default_height,
            } => {
                w.put(handle);
                w.put_u32(*default_width);
                w.put_u32(*default_height);
            }
            Self::Nvg { handle } | Self::Svg { handle } | Self::Blob { handle } => {
                w.put(handle);
            }
            Self::PlatformSurface { id, width, height } => {
                w.put_u64(*id);
                w.put_u32(*width);
                w.put_u32(*height);
            }
        }
    }

    fn decode(r: &mut WireReader<'_>) -> IpcResult<Self> {
        let info = match IconFormat::try_from(r.get_i32()?)? {
            IconFormat::Invalid => Self::Invalid,
            IconFormat::Raster => Self::Raster {
                handle: r.get()?,
                width: r.get_u32()?,
                height: r.get_u32()?,
                default_width: r.get_u32()?,
                default_height: r.get_u32()?,
                pixel_format: r.get_u32()?,
            },
            IconFormat::Pic => Self::Pic {
                handle: r.get()?,
                default_width: r.get_u32()?,
                default_height: r.get_u32()?,
            },
            IconFormat::Nvg => Self::Nvg { handle: r.get()? },
            IconFormat::Svg => Self::Svg { handle: r.get()? },
            IconFormat::Blob => Self::Blob { handle: r.get()? },
            IconFormat::PlatformSurface => Self::PlatformSurface {
                id: r.get_u64()?,
                width: r.get_u32()?,
                height: r.get_u32()?,
            },
        };
        Ok(info)
    }
}

/// Number of pieces a multi-part icon id stands for.
///
/// `_3PV` and `_3PH` suffixed ids have three pieces, `_9P` nine, anything
/// else one. Matching ignores case.
pub fn piece_count(composite_id: &str) -> usize {
    let upper = composite_id.to_ascii_uppercase();
    if upper.contains("_3PV") || upper.contains("_3PH") {
        3
    } else if upper.contains("_9P") {
        9
    } else {
        1
    }
}
