//! Resource production.
//!
//! Rendering is out of scope: the reference producer copies source bytes into
//! the shared region and tags them with a format derived from the file
//! extension. Servers and degraded clients both go through
//! [`ResourceProducer`], so a real renderer can be slotted in later.

use std::io::Read;
use std::path::Path;

use theme_arena::{Arena, ArenaKind};
use theme_ipc::{ArenaRef, IconFormat, IconKey, SharedIconInfo};
use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// Pixel format tag for raster payloads stored still encoded.
pub const PIXEL_FORMAT_ENCODED: u32 = 0;

/// Largest single resource the reference producer accepts.
pub const MAX_RESOURCE_SIZE: usize = 8 * 1024 * 1024;

/// Turns source files into arena resources.
pub trait ResourceProducer: Send + Sync {
    /// Produce an icon for `key` from `source`.
    fn produce_icon(
        &self,
        arena: &mut Arena,
        key: &IconKey,
        source: &Path,
    ) -> ResourceResult<SharedIconInfo>;

    /// Produce an opaque data resource (stylesheet, layout, effect, table).
    fn produce_data(&self, arena: &mut Arena, source: &Path) -> ResourceResult<ArenaRef>;
}

/// Format of an icon file, by extension.
pub fn icon_format_for(path: &Path) -> IconFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("svg") | Some("svgz") => IconFormat::Svg,
        Some("nvg") => IconFormat::Nvg,
        Some("pic") => IconFormat::Pic,
        Some("png") | Some("jpg") | Some("jpeg") | Some("bmp") | Some("gif") => IconFormat::Raster,
        _ => IconFormat::Blob,
    }
}

/// Intrinsic size of a PNG file, read from its IHDR chunk.
pub fn image_dimensions(path: &Path) -> Option<(u32, u32)> {
    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    let mut header = [0u8; 24];
    std::fs::File::open(path).ok()?.read_exact(&mut header).ok()?;
    if header[..8] != PNG_SIGNATURE || &header[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(header[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(header[20..24].try_into().ok()?);
    Some((width, height))
}

/// Reference producer: stores file bytes verbatim.
#[derive(Debug, Clone)]
pub struct FileProducer {
    max_size: usize,
}

impl Default for FileProducer {
    fn default() -> Self {
        Self {
            max_size: MAX_RESOURCE_SIZE,
        }
    }
}

impl FileProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self { max_size }
    }

    fn store(&self, arena: &mut Arena, source: &Path) -> ResourceResult<ArenaRef> {
        let data = std::fs::read(source)?;
        if data.len() > self.max_size {
            return Err(ResourceError::TooLarge(data.len()));
        }
        let len = u32::try_from(data.len()).map_err(|_| ResourceError::TooLarge(data.len()))?;
        let offset = arena.alloc_bytes(ArenaKind::Shared, &data)?;
        debug!(source = %source.display(), offset, len, "Stored resource");
        Ok(ArenaRef::new(offset, len, arena.generation()))
    }
}

impl ResourceProducer for FileProducer {
    fn produce_icon(
        &self,
        arena: &mut Arena,
        key: &IconKey,
        source: &Path,
    ) -> ResourceResult<SharedIconInfo> {
        let format = icon_format_for(source);
        let handle = self.store(arena, source)?;
        let (default_width, default_height) = image_dimensions(source).unwrap_or((0, 0));
        let requested = |value: f32, fallback: u32| {
            if value > 0.0 {
                value.round() as u32
            } else {
                fallback
            }
        };

        Ok(match format {
            IconFormat::Svg => SharedIconInfo::Svg { handle },
            IconFormat::Nvg => SharedIconInfo::Nvg { handle },
            IconFormat::Pic => SharedIconInfo::Pic {
                handle,
                default_width: requested(key.id.size.width, 0),
                default_height: requested(key.id.size.height, 0),
            },
            IconFormat::Raster => SharedIconInfo::Raster {
                handle,
                width: requested(key.id.size.width, default_width),
                height: requested(key.id.size.height, default_height),
                default_width,
                default_height,
                pixel_format: PIXEL_FORMAT_ENCODED,
            },
            _ => SharedIconInfo::Blob { handle },
        })
    }

    fn produce_data(&self, arena: &mut Arena, source: &Path) -> ResourceResult<ArenaRef> {
        self.store(arena, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use theme_arena::MIN_ARENA_SIZE;
    use theme_ipc::{IconId, SizeF};

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    fn key(path: &str, w: f32, h: f32) -> IconKey {
        IconKey::new(IconId::new(path, SizeF::new(w, h)))
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(icon_format_for(Path::new("a.svg")), IconFormat::Svg);
        assert_eq!(icon_format_for(Path::new("a.SVG")), IconFormat::Svg);
        assert_eq!(icon_format_for(Path::new("a.nvg")), IconFormat::Nvg);
        assert_eq!(icon_format_for(Path::new("a.pic")), IconFormat::Pic);
        assert_eq!(icon_format_for(Path::new("a.png")), IconFormat::Raster);
        assert_eq!(icon_format_for(Path::new("a.fxml")), IconFormat::Blob);
        assert_eq!(icon_format_for(Path::new("noext")), IconFormat::Blob);
    }

    #[test]
    fn test_png_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("icon.png");
        std::fs::write(&png, png_header(48, 32)).unwrap();
        assert_eq!(image_dimensions(&png), Some((48, 32)));

        let svg = dir.path().join("icon.svg");
        std::fs::write(&svg, b"<svg xmlns='http://www.w3.org/2000/svg'/>").unwrap();
        assert_eq!(image_dimensions(&svg), None);
    }

    #[test]
    fn test_svg_icon_stored_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("qtg_small_star.svg");
        std::fs::write(&svg, b"<svg/>").unwrap();

        let mut arena = Arena::private(MIN_ARENA_SIZE).unwrap();
        let info = FileProducer::new()
            .produce_icon(&mut arena, &key("qtg_small_star", 24.0, 24.0), &svg)
            .unwrap();

        let handle = match info {
            SharedIconInfo::Svg { handle } => handle,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(handle.len, 6);
        assert_eq!(
            arena.bytes(handle.generation, handle.offset, handle.len as usize),
            Some(&b"<svg/>"[..])
        );
    }

    #[test]
    fn test_raster_icon_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("qtg_large_info.png");
        std::fs::write(&png, png_header(64, 64)).unwrap();
        let mut arena = Arena::private(MIN_ARENA_SIZE).unwrap();
        let producer = FileProducer::new();

        match producer
            .produce_icon(&mut arena, &key("qtg_large_info", 32.0, 30.6), &png)
            .unwrap()
        {
            SharedIconInfo::Raster {
                width,
                height,
                default_width,
                default_height,
                pixel_format,
                ..
            } => {
                assert_eq!((width, height), (32, 31));
                assert_eq!((default_width, default_height), (64, 64));
                assert_eq!(pixel_format, PIXEL_FORMAT_ENCODED);
            }
            other => panic!("unexpected {:?}", other),
        }

        // No requested size falls back to the intrinsic one.
        match producer
            .produce_icon(&mut arena, &key("qtg_large_info", 0.0, 0.0), &png)
            .unwrap()
        {
            SharedIconInfo::Raster { width, height, .. } => assert_eq!((width, height), (64, 64)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_oversized_resource_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let css = dir.path().join("big.css");
        std::fs::write(&css, vec![b'a'; 128]).unwrap();
        let mut arena = Arena::private(MIN_ARENA_SIZE).unwrap();

        assert!(matches!(
            FileProducer::with_max_size(64).produce_data(&mut arena, &css),
            Err(ResourceError::TooLarge(128))
        ));
        assert_eq!(arena.live_blocks(ArenaKind::Shared), 0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let mut arena = Arena::private(MIN_ARENA_SIZE).unwrap();
        assert!(matches!(
            FileProducer::new().produce_data(&mut arena, Path::new("/nonexistent/x.css")),
            Err(ResourceError::Io(_))
        ));
    }
}
