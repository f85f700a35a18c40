//! Memory layout of the resource arena.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ArenaHeader (cache-line aligned)                            │
//! │  ├─ magic: u32            (0x54535256 = "TSRV")              │
//! │  ├─ version: u32                                             │
//! │  ├─ generation: u64       (atomic, bumped on reset)          │
//! │  ├─ total_size: u64                                          │
//! │  ├─ heap_root: u64        (offset of the heap allocator root)│
//! │  ├─ shared_root: u64      (offset of the shared root)        │
//! │  └─ theme_slots[4]        (base, operator removable,         │
//! │                            operator firmware, active)        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Heap allocator root, shared allocator root                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Heap region   (theme index tables)                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Shared region (resource payloads, composite blobs)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block in a region starts with an in-band block header; offsets
//! handed out point just past it and are 8-byte aligned.

use std::sync::atomic::{AtomicU64, Ordering};

/// Magic number for validating the arena: "TSRV".
pub const MAGIC: u32 = 0x5453_5256;

/// Layout version. Increment when making breaking changes.
pub const VERSION: u32 = 1;

/// Capacity of a theme slot name, including the NUL terminator.
pub const SLOT_NAME_LEN: usize = 64;

/// Capacity of a theme slot root path, including the NUL terminator.
pub const SLOT_PATH_LEN: usize = 256;

/// Size of the arena header.
pub const HEADER_SIZE: usize = std::mem::size_of::<ArenaHeader>();

/// Size reserved for each allocator root.
pub const ROOT_SIZE: usize = 64;

/// Allocation granularity.
pub const ALIGN: usize = 8;

/// Round `n` up to a multiple of `align` (a power of two).
pub const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// Which theme index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThemeSlot {
    Base = 0,
    OperatorRemovable = 1,
    OperatorFirmware = 2,
    Active = 3,
}

impl ThemeSlot {
    pub const ALL: [ThemeSlot; 4] = [
        ThemeSlot::Base,
        ThemeSlot::OperatorRemovable,
        ThemeSlot::OperatorFirmware,
        ThemeSlot::Active,
    ];
}

/// One theme index slot as stored in the header.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ThemeIndexSlot {
    pub name: [u8; SLOT_NAME_LEN],
    pub root: [u8; SLOT_PATH_LEN],
    /// Heap offset of the index table, `-1` when empty.
    pub table_offset: i64,
}

impl ThemeIndexSlot {
    pub const EMPTY: ThemeIndexSlot = ThemeIndexSlot {
        name: [0; SLOT_NAME_LEN],
        root: [0; SLOT_PATH_LEN],
        table_offset: -1,
    };
}

/// Owned copy of a theme index slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSlotInfo {
    pub name: String,
    pub root: String,
    pub table_offset: i64,
}

impl ThemeSlotInfo {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.table_offset < 0
    }
}

/// Arena header at offset zero.
#[repr(C, align(64))]
pub struct ArenaHeader {
    /// Magic number for validation (MAGIC = 0x54535256)
    pub magic: u32,
    /// Layout version
    pub version: u32,
    /// Bumped on every reset; handles from older generations are stale
    pub generation: AtomicU64,
    /// Total mapped size in bytes
    pub total_size: u64,
    /// Offset of the heap allocator root
    pub heap_root: u64,
    /// Offset of the shared allocator root
    pub shared_root: u64,
    pub theme_slots: [ThemeIndexSlot; 4],
}

impl ArenaHeader {
    /// Validate the header magic and version
    pub fn validate(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn slot(&self, slot: ThemeSlot) -> ThemeSlotInfo {
        let raw = &self.theme_slots[slot as usize];
        ThemeSlotInfo {
            name: read_cstr(&raw.name),
            root: read_cstr(&raw.root),
            table_offset: raw.table_offset,
        }
    }
}

/// Copy `value` into a NUL-terminated fixed buffer, truncating on a char
/// boundary.
pub(crate) fn write_cstr(buf: &mut [u8], value: &str) {
    buf.fill(0);
    let mut end = value.len().min(buf.len().saturating_sub(1));
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    buf[..end].copy_from_slice(&value.as_bytes()[..end]);
}

pub(crate) fn read_cstr(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_cache_line_aligned() {
        assert_eq!(std::mem::align_of::<ArenaHeader>(), 64);
        assert_eq!(HEADER_SIZE % 64, 0);
    }

    #[test]
    fn test_magic_spells_tsrv() {
        assert_eq!(&MAGIC.to_be_bytes(), b"TSRV");
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(65, 64), 128);
    }

    #[test]
    fn test_cstr_truncates_and_terminates() {
        let mut buf = [0xffu8; 8];
        write_cstr(&mut buf, "hbdefaulttheme");
        assert_eq!(buf[7], 0);
        assert_eq!(read_cstr(&buf), "hbdefau");
    }

    #[test]
    fn test_cstr_respects_char_boundaries() {
        let mut buf = [0u8; 4];
        write_cstr(&mut buf, "aéé");
        assert_eq!(read_cstr(&buf), "aé");
    }
}
