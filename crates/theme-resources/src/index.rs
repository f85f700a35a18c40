//! Theme index tables.
//!
//! The server scans each tier's icon directory once per theme selection and
//! stores a sorted table in the arena heap. The table offset is recorded in
//! the matching header slot, so clients can find icon files without touching
//! the file system.
//!
//! ```text
//! [0: version u32][4: count u32][8: total_len u32][12: strings_at u32]
//! [16: items, ITEM_SIZE each, sorted by name]
//! [strings_at: UTF-8 string area]
//!
//! item: [name_off][name_len][ext_off][ext_len]
//!       [mirrored_ext_off][mirrored_ext_len][default_w][default_h]
//! ```
//!
//! String offsets are relative to the table start. A missing mirrored
//! variant has `mirrored_ext_len == 0`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use theme_arena::{Arena, ArenaKind, ThemeSlot};
use tracing::{debug, warn};

use crate::error::{ResourceError, ResourceResult};
use crate::producer::image_dimensions;
use crate::roots::{ResourceKind, ThemeRoots, MIRRORED_DIR};

pub const INDEX_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;
const ITEM_SIZE: usize = 32;

/// One icon known to a theme tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexItem {
    /// Icon name without extension.
    pub name: String,
    pub ext: String,
    /// Extension of the variant under `mirrored/`, if any.
    pub mirrored_ext: Option<String>,
    /// Intrinsic size for raster formats, `(0, 0)` otherwise.
    pub default_size: (u32, u32),
}

impl IndexItem {
    /// File of this icon below the tier directory.
    pub fn relative_path(&self, mirrored: bool) -> PathBuf {
        match (&self.mirrored_ext, mirrored) {
            (Some(ext), true) => Path::new(MIRRORED_DIR).join(format!("{}.{}", self.name, ext)),
            _ => PathBuf::from(format!("{}.{}", self.name, self.ext)),
        }
    }
}

/// Scan an icon directory. When a name exists with several extensions the
/// alphabetically first file wins.
pub fn scan_icons(dir: &Path) -> Vec<IndexItem> {
    let mut items: BTreeMap<String, IndexItem> = BTreeMap::new();

    for (name, ext) in list_files(dir) {
        let default_size = image_dimensions(&dir.join(format!("{}.{}", name, ext))).unwrap_or((0, 0));
        items.entry(name.clone()).or_insert(IndexItem {
            name,
            ext,
            mirrored_ext: None,
            default_size,
        });
    }

    for (name, ext) in list_files(&dir.join(MIRRORED_DIR)) {
        if let Some(item) = items.get_mut(&name) {
            if item.mirrored_ext.is_none() {
                item.mirrored_ext = Some(ext);
            }
        }
    }

    debug!(dir = %dir.display(), count = items.len(), "Scanned icon directory");
    items.into_values().collect()
}

fn list_files(dir: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_string();
            let ext = path.extension()?.to_str()?.to_string();
            Some((stem, ext))
        })
        .collect();
    files.sort();
    files
}

/// Serialize items into the table format.
pub fn encode_index(items: &[IndexItem]) -> ResourceResult<Vec<u8>> {
    let mut sorted: Vec<&IndexItem> = items.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted.dedup_by(|a, b| a.name == b.name);

    let strings_at = HEADER_LEN + sorted.len() * ITEM_SIZE;
    let mut strings: Vec<u8> = Vec::new();
    let mut table: Vec<u8> = Vec::with_capacity(strings_at);

    let mut item_bytes = Vec::with_capacity(sorted.len() * ITEM_SIZE);
    for item in &sorted {
        let (name_off, name_len) = push_str(&mut strings, strings_at, &item.name)?;
        let (ext_off, ext_len) = push_str(&mut strings, strings_at, &item.ext)?;
        let (m_off, m_len) = match &item.mirrored_ext {
            Some(ext) => push_str(&mut strings, strings_at, ext)?,
            None => (0, 0),
        };
        for v in [
            name_off,
            name_len,
            ext_off,
            ext_len,
            m_off,
            m_len,
            item.default_size.0,
            item.default_size.1,
        ] {
            item_bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    let total = strings_at + strings.len();
    for v in [
        INDEX_VERSION,
        to_u32(sorted.len())?,
        to_u32(total)?,
        to_u32(strings_at)?,
    ] {
        table.extend_from_slice(&v.to_le_bytes());
    }
    table.extend_from_slice(&item_bytes);
    table.extend_from_slice(&strings);
    Ok(table)
}

fn push_str(strings: &mut Vec<u8>, base: usize, s: &str) -> ResourceResult<(u32, u32)> {
    let off = to_u32(base + strings.len())?;
    strings.extend_from_slice(s.as_bytes());
    Ok((off, to_u32(s.len())?))
}

fn to_u32(n: usize) -> ResourceResult<u32> {
    u32::try_from(n).map_err(|_| ResourceError::TooLarge(n))
}

/// Store a table in the arena heap, returning its offset.
pub fn write_index(arena: &mut Arena, items: &[IndexItem]) -> ResourceResult<i64> {
    let table = encode_index(items)?;
    Ok(arena.alloc_bytes(ArenaKind::Heap, &table)?)
}

/// Borrowed view of an encoded table.
#[derive(Debug, Clone, Copy)]
pub struct ThemeIndexView<'a> {
    bytes: &'a [u8],
    count: usize,
}

impl<'a> ThemeIndexView<'a> {
    /// Validate and wrap an encoded table.
    pub fn parse(bytes: &'a [u8]) -> ResourceResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ResourceError::Malformed("short header".into()));
        }
        let version = read_u32(bytes, 0)?;
        if version != INDEX_VERSION {
            return Err(ResourceError::Malformed(format!(
                "unsupported index version {}",
                version
            )));
        }
        let count = read_u32(bytes, 4)? as usize;
        let total = read_u32(bytes, 8)? as usize;
        let items_end = count
            .checked_mul(ITEM_SIZE)
            .and_then(|n| n.checked_add(HEADER_LEN));
        if total > bytes.len() || items_end.map_or(true, |end| end > total) {
            return Err(ResourceError::Malformed("length mismatch".into()));
        }
        Ok(Self {
            bytes: &bytes[..total],
            count,
        })
    }

    /// Read a table from the arena.
    pub fn read(arena: &'a Arena, generation: u64, offset: i64) -> ResourceResult<Self> {
        let header = arena.try_bytes(generation, offset, HEADER_LEN)?;
        let total = read_u32(header, 8)? as usize;
        let bytes = arena.try_bytes(generation, offset, total)?;
        Self::parse(bytes)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn str_at(&self, off: u32, len: u32) -> ResourceResult<&'a str> {
        let start = off as usize;
        let end = start + len as usize;
        let slice = self
            .bytes
            .get(start..end)
            .ok_or_else(|| ResourceError::Malformed("string out of range".into()))?;
        std::str::from_utf8(slice).map_err(|e| ResourceError::Malformed(e.to_string()))
    }

    fn name_at(&self, index: usize) -> ResourceResult<&'a str> {
        let base = HEADER_LEN + index * ITEM_SIZE;
        self.str_at(read_u32(self.bytes, base)?, read_u32(self.bytes, base + 4)?)
    }

    pub fn item(&self, index: usize) -> ResourceResult<IndexItem> {
        if index >= self.count {
            return Err(ResourceError::Malformed(format!("no item {}", index)));
        }
        let base = HEADER_LEN + index * ITEM_SIZE;
        let field = |i: usize| read_u32(self.bytes, base + i * 4);
        let mirrored_len = field(5)?;
        Ok(IndexItem {
            name: self.str_at(field(0)?, field(1)?)?.to_string(),
            ext: self.str_at(field(2)?, field(3)?)?.to_string(),
            mirrored_ext: if mirrored_len == 0 {
                None
            } else {
                Some(self.str_at(field(4)?, mirrored_len)?.to_string())
            },
            default_size: (field(6)?, field(7)?),
        })
    }

    /// Binary search by icon name.
    pub fn lookup(&self, name: &str) -> Option<IndexItem> {
        let (mut lo, mut hi) = (0usize, self.count);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let candidate = self.name_at(mid).ok()?;
            match candidate.cmp(name) {
                std::cmp::Ordering::Equal => return self.item(mid).ok(),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }
}

/// Scan every tier's icon directory and record the tables in the header
/// slots. Tiers without an icon directory get an empty slot.
pub fn build_theme_indexes(roots: &ThemeRoots, arena: &mut Arena) -> ResourceResult<()> {
    let folder = ResourceKind::Icon.folder();
    for slot in ThemeSlot::ALL {
        arena.clear_theme_slot(slot)?;
    }
    for slot in roots.tiers() {
        let dir = roots.tier_dir(slot, folder);
        if !dir.is_dir() {
            continue;
        }
        let items = scan_icons(&dir);
        let offset = write_index(arena, &items)?;
        let name = match slot {
            ThemeSlot::OperatorRemovable => "operator-removable",
            ThemeSlot::OperatorFirmware => "operator-firmware",
            ThemeSlot::Active => roots.active_theme(),
            ThemeSlot::Base => roots.base_theme(),
        };
        arena.set_theme_slot(slot, name, &dir.to_string_lossy(), offset)?;
        debug!(?slot, name, count = items.len(), "Theme index built");
    }
    Ok(())
}

/// Resolve an icon through the arena's index tables, falling back to the
/// file system.
pub fn resolve_icon(roots: &ThemeRoots, arena: &Arena, logical: &str, mirrored: bool) -> Option<PathBuf> {
    let indexed = !logical.is_empty()
        && Path::new(logical).extension().is_none()
        && Path::new(logical).components().count() == 1;

    if indexed {
        let generation = arena.generation();
        for slot in roots.tiers() {
            let info = arena.theme_slot(slot);
            if info.table_offset < 0 {
                continue;
            }
            let view = match ThemeIndexView::read(arena, generation, info.table_offset) {
                Ok(view) => view,
                Err(e) => {
                    warn!(?slot, error = %e, "Unreadable theme index");
                    continue;
                }
            };
            if let Some(item) = view.lookup(logical) {
                let file = Path::new(&info.root).join(item.relative_path(mirrored));
                if file.is_file() {
                    return Some(file);
                }
            }
        }
    }
    roots.resolve(ResourceKind::Icon, logical, mirrored)
}

fn read_u32(bytes: &[u8], at: usize) -> ResourceResult<u32> {
    bytes
        .get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| ResourceError::Malformed(format!("read past end at {}", at)))
}
