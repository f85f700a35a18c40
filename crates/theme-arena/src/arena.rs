//! The resource arena: one mapping, two allocators, one generation counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::allocator::{FreeList, RawMem, BLOCK_HEADER_SIZE};
use crate::error::{ArenaError, ArenaResult};
use crate::layout::{
    align_up, write_cstr, ArenaHeader, ThemeIndexSlot, ThemeSlot, ThemeSlotInfo, ALIGN,
    HEADER_SIZE, MAGIC, ROOT_SIZE, VERSION,
};
use crate::shm::{
    close_shm, create_shm, map_anonymous, open_shm_readonly, shm_name, still_named, unlink_shm,
};
use crate::ArenaKind;

/// Fraction of the allocatable space given to the heap allocator.
const HEAP_SHARE: usize = 4;

/// Smallest arena that still leaves room for both allocators.
pub const MIN_ARENA_SIZE: usize = 64 * 1024;

/// Plain-old-data types that may be read directly out of the arena.
///
/// # Safety
///
/// Implementors must be valid for every bit pattern and contain no
/// pointers or references.
pub unsafe trait ArenaValue: Sized {}

unsafe impl ArenaValue for u8 {}
unsafe impl ArenaValue for u16 {}
unsafe impl ArenaValue for u32 {}
unsafe impl ArenaValue for u64 {}
unsafe impl ArenaValue for i32 {}
unsafe impl ArenaValue for i64 {}
unsafe impl<T: ArenaValue, const N: usize> ArenaValue for [T; N] {}

enum Backing {
    /// Server-owned POSIX object, unlinked on drop.
    Owner { name: String, fd: libc::c_int },
    /// Client view of the server's object.
    View { name: String, fd: libc::c_int },
    /// Process-private anonymous memory.
    Private,
}

/// A mapped arena.
///
/// The server owns a writable arena created with [`Arena::create`]; clients
/// hold a read-only view from [`Arena::open`]; degraded clients use a
/// writable [`Arena::private`] arena. Handles are `(generation, offset)`
/// pairs; once [`Arena::reset`] bumps the generation, older handles fail to
/// dereference.
pub struct Arena {
    ptr: *mut u8,
    size: usize,
    writable: bool,
    backing: Backing,
}

// SAFETY: The arena owns its mapping. Mutation requires `&mut self`, and the
// only state touched through `&self` by other processes is the atomic
// generation counter.
unsafe impl Send for Arena {}

// SAFETY: All `&self` methods only read the mapping.
unsafe impl Sync for Arena {}

impl Arena {
    /// Create and initialize the named shared arena.
    ///
    /// A leftover object with the same name (from a server that did not shut
    /// down cleanly) is unlinked and recreated. Callers must already hold the
    /// server singleton.
    ///
    /// The first generation is never one that an earlier arena of the same
    /// name handed out, so handles held across a server restart are stale.
    pub fn create(arena_name: &str, size: usize) -> ArenaResult<Self> {
        check_size(size)?;
        let name = shm_name(arena_name);

        info!(name = %name, size, "Creating shared arena");

        let mut floor = 0;
        let (ptr, fd) = match create_shm(&name, size) {
            Ok(mapping) => mapping,
            Err(ArenaError::AlreadyExists(_)) => {
                if let Ok(stale) = Self::open(arena_name) {
                    if stale.header().validate() {
                        floor = stale.generation().saturating_add(1);
                    }
                }
                warn!(name = %name, "Replacing stale shared arena");
                unlink_shm(&name)?;
                create_shm(&name, size)?
            }
            Err(e) => return Err(e),
        };

        let mut arena = Self {
            ptr,
            size,
            writable: true,
            backing: Backing::Owner { name, fd },
        };
        arena.format(initial_generation().max(floor))?;
        Ok(arena)
    }

    /// Map an existing named arena read-only.
    pub fn open(arena_name: &str) -> ArenaResult<Self> {
        let name = shm_name(arena_name);
        let (ptr, fd, size) = open_shm_readonly(&name)?;
        debug!(name = %name, size, "Opened arena view");
        Ok(Self {
            ptr,
            size,
            writable: false,
            backing: Backing::View { name, fd },
        })
    }

    /// Create a process-local arena with the same layout.
    pub fn private(size: usize) -> ArenaResult<Self> {
        check_size(size)?;
        let ptr = map_anonymous(size)?;
        let mut arena = Self {
            ptr,
            size,
            writable: true,
            backing: Backing::Private,
        };
        arena.format(initial_generation())?;
        debug!(size, "Created private arena");
        Ok(arena)
    }

    /// Lay out header and both allocators from scratch.
    fn format(&mut self, generation: u64) -> ArenaResult<()> {
        let roots = align_up(HEADER_SIZE, ALIGN);
        let heap_root = roots;
        let shared_root = roots + ROOT_SIZE;
        let data_start = align_up(shared_root + ROOT_SIZE, 64);
        let available = self.size - data_start;
        let heap_size = align_up(available / HEAP_SHARE, ALIGN);
        let shared_start = data_start + heap_size;
        let shared_size = (self.size - shared_start) & !(ALIGN - 1);
        let total_size = self.size as u64;

        {
            let header = self.header_mut()?;
            header.magic = MAGIC;
            header.version = VERSION;
            header.total_size = total_size;
            header.heap_root = heap_root as u64;
            header.shared_root = shared_root as u64;
            header.theme_slots = [ThemeIndexSlot::EMPTY; 4];
            header.generation.store(generation, Ordering::Release);
        }

        let mut mem = RawMem::new(self.ptr, self.size);
        self.list(ArenaKind::Heap)
            .init(&mut mem, data_start, heap_size)?;
        self.list(ArenaKind::Shared)
            .init(&mut mem, shared_start, shared_size)?;
        Ok(())
    }

    fn header(&self) -> &ArenaHeader {
        // SAFETY: every constructor maps at least HEADER_SIZE bytes at a
        // page-aligned address.
        unsafe { &*(self.ptr as *const ArenaHeader) }
    }

    fn header_mut(&mut self) -> ArenaResult<&mut ArenaHeader> {
        if !self.writable {
            return Err(ArenaError::ReadOnly);
        }
        // SAFETY: writable mappings are PROT_WRITE and exclusively borrowed.
        Ok(unsafe { &mut *(self.ptr as *mut ArenaHeader) })
    }

    fn list(&self, kind: ArenaKind) -> FreeList {
        let header = self.header();
        let root = match kind {
            ArenaKind::Heap => header.heap_root,
            ArenaKind::Shared => header.shared_root,
        };
        FreeList {
            kind,
            root: root as usize,
        }
    }

    fn mem(&self) -> RawMem {
        RawMem::new(self.ptr, self.size)
    }

    fn writable_mem(&mut self) -> ArenaResult<RawMem> {
        if !self.writable {
            return Err(ArenaError::ReadOnly);
        }
        Ok(self.mem())
    }

    /// Name of the arena without the leading `/`, if it is a named one.
    pub fn name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Owner { name, .. } | Backing::View { name, .. } => {
                Some(name.trim_start_matches('/'))
            }
            Backing::Private => None,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.header().generation()
    }

    /// Allocate `size` bytes from `kind`, returning the payload offset.
    pub fn alloc(&mut self, kind: ArenaKind, size: usize) -> ArenaResult<i64> {
        let mut mem = self.writable_mem()?;
        let offset = self.list(kind).alloc(&mut mem, size)?;
        Ok(offset as i64)
    }

    /// Allocate and fill a block with `data`.
    pub fn alloc_bytes(&mut self, kind: ArenaKind, data: &[u8]) -> ArenaResult<i64> {
        let offset = self.alloc(kind, data.len())?;
        self.write(kind, offset, data)?;
        Ok(offset)
    }

    /// Release an allocation. Unknown offsets are rejected and logged.
    pub fn free(&mut self, kind: ArenaKind, offset: i64) -> ArenaResult<()> {
        if offset < 0 {
            warn!(?kind, offset, "Rejecting free of negative offset");
            return Err(ArenaError::InvalidOffset { kind, offset });
        }
        let mut mem = self.writable_mem()?;
        self.list(kind).free(&mut mem, offset as usize)
    }

    /// Copy `data` into a live allocation of `kind`.
    pub fn write(&mut self, kind: ArenaKind, offset: i64, data: &[u8]) -> ArenaResult<()> {
        let mem = self.writable_mem()?;
        if offset < 0 {
            return Err(ArenaError::InvalidOffset { kind, offset });
        }
        let capacity = self.list(kind).capacity(&mem, offset as usize)?;
        if data.len() > capacity {
            return Err(ArenaError::OutOfBounds {
                offset,
                len: data.len(),
            });
        }
        // SAFETY: the destination is a live block of at least `capacity`
        // bytes inside the writable mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Address of `offset`, checked against the region of `kind`.
    pub fn address_of(&self, kind: ArenaKind, offset: i64) -> ArenaResult<*const u8> {
        if offset < 0 || !self.list(kind).contains(&self.mem(), offset as usize) {
            return Err(ArenaError::InvalidOffset { kind, offset });
        }
        // SAFETY: offset lies within the mapping.
        Ok(unsafe { self.ptr.add(offset as usize) as *const u8 })
    }

    fn check_range(&self, generation: u64, offset: i64, len: usize) -> ArenaResult<usize> {
        let current = self.generation();
        if generation != current {
            return Err(ArenaError::StaleHandle {
                handle: generation,
                current,
            });
        }
        let start = usize::try_from(offset).map_err(|_| ArenaError::OutOfBounds { offset, len })?;
        let data_start = HEADER_SIZE + 2 * ROOT_SIZE;
        match start.checked_add(len) {
            Some(end) if start >= data_start && end <= self.size => Ok(start),
            _ => Err(ArenaError::OutOfBounds { offset, len }),
        }
    }

    /// Read a `T` at `offset` if the handle's generation is current.
    pub fn try_deref<T: ArenaValue>(&self, generation: u64, offset: i64) -> ArenaResult<&T> {
        let start = self.check_range(generation, offset, std::mem::size_of::<T>())?;
        if start % std::mem::align_of::<T>() != 0 {
            return Err(ArenaError::OutOfBounds {
                offset,
                len: std::mem::size_of::<T>(),
            });
        }
        // SAFETY: in bounds, aligned, and T is valid for any bit pattern.
        Ok(unsafe { &*(self.ptr.add(start) as *const T) })
    }

    pub fn deref<T: ArenaValue>(&self, generation: u64, offset: i64) -> Option<&T> {
        self.try_deref(generation, offset).ok()
    }

    /// Borrow `len` bytes at `offset` if the handle's generation is current.
    pub fn try_bytes(&self, generation: u64, offset: i64, len: usize) -> ArenaResult<&[u8]> {
        let start = self.check_range(generation, offset, len)?;
        // SAFETY: range checked against the mapping.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr.add(start), len) })
    }

    pub fn bytes(&self, generation: u64, offset: i64, len: usize) -> Option<&[u8]> {
        self.try_bytes(generation, offset, len).ok()
    }

    /// Drop every allocation, clear the theme slots and bump the generation.
    pub fn reset(&mut self) -> ArenaResult<u64> {
        let next = self.generation() + 1;
        self.format(next)?;
        info!(generation = next, "Arena reset");
        Ok(next)
    }

    /// Record a theme index table in one of the header slots.
    pub fn set_theme_slot(
        &mut self,
        slot: ThemeSlot,
        name: &str,
        root: &str,
        table_offset: i64,
    ) -> ArenaResult<()> {
        let header = self.header_mut()?;
        let raw = &mut header.theme_slots[slot as usize];
        write_cstr(&mut raw.name, name);
        write_cstr(&mut raw.root, root);
        raw.table_offset = table_offset;
        Ok(())
    }

    pub fn clear_theme_slot(&mut self, slot: ThemeSlot) -> ArenaResult<()> {
        let header = self.header_mut()?;
        header.theme_slots[slot as usize] = ThemeIndexSlot::EMPTY;
        Ok(())
    }

    pub fn theme_slot(&self, slot: ThemeSlot) -> ThemeSlotInfo {
        self.header().slot(slot)
    }

    /// Free payload capacity of one allocator.
    pub fn free_bytes(&self, kind: ArenaKind) -> usize {
        self.list(kind).free_bytes(&self.mem()).unwrap_or(0)
    }

    /// Bytes held by live blocks of one allocator.
    pub fn allocated_bytes(&self, kind: ArenaKind) -> usize {
        self.list(kind).allocated_bytes(&self.mem()).unwrap_or(0)
    }

    pub fn live_blocks(&self, kind: ArenaKind) -> usize {
        self.list(kind).live_blocks(&self.mem()).unwrap_or(0)
    }

    /// Overhead added to every allocation.
    pub const fn block_overhead() -> usize {
        BLOCK_HEADER_SIZE
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let fd = match &self.backing {
            Backing::Owner { fd, .. } | Backing::View { fd, .. } => *fd,
            Backing::Private => -1,
        };

        // A replacement server may already own the name.
        if let Backing::Owner { name, fd } = &self.backing {
            if still_named(name, *fd) {
                debug!(name = %name, "Unlinking shared arena");
                if let Err(e) = unlink_shm(name) {
                    error!(name = %name, error = %e, "Failed to unlink shared arena");
                }
            } else {
                debug!(name = %name, "Shared arena name already reused, not unlinking");
            }
        }

        // SAFETY: the mapping is released exactly once, here.
        unsafe {
            close_shm(self.ptr, self.size, fd);
        }
    }
}

static LAST_SEED: AtomicU64 = AtomicU64::new(0);

/// Wall-clock microseconds, strictly increasing within the process. Resets
/// take longer than a microsecond, so a later arena starts above every
/// generation an earlier one reached.
fn initial_generation() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
        .max(1);
    let previous = LAST_SEED
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1)
}

fn check_size(size: usize) -> ArenaResult<()> {
    if size < MIN_ARENA_SIZE {
        return Err(ArenaError::InvalidSize(format!(
            "{} bytes is below the minimum of {}",
            size, MIN_ARENA_SIZE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> Arena {
        Arena::private(MIN_ARENA_SIZE).unwrap()
    }

    #[test]
    fn test_private_arena_generation_is_seeded() {
        let before = initial_generation();
        let arena = arena();
        assert!(arena.generation() >= before);
        assert!(arena.name().is_none());
        assert!(arena.is_writable());
        assert!(arena.free_bytes(ArenaKind::Heap) > 0);
        assert!(arena.free_bytes(ArenaKind::Shared) > arena.free_bytes(ArenaKind::Heap));
    }

    #[test]
    fn test_too_small_rejected() {
        assert!(matches!(
            Arena::private(1024),
            Err(ArenaError::InvalidSize(_))
        ));
    }

    #[test]
    fn test_alloc_bytes_and_read_back() {
        let mut arena = arena();
        let offset = arena.alloc_bytes(ArenaKind::Shared, b"<svg/>").unwrap();
        let gen = arena.generation();
        assert_eq!(arena.bytes(gen, offset, 6), Some(&b"<svg/>"[..]));
    }

    #[test]
    fn test_write_beyond_capacity_rejected() {
        let mut arena = arena();
        let offset = arena.alloc(ArenaKind::Shared, 8).unwrap();
        assert!(matches!(
            arena.write(ArenaKind::Shared, offset, &[0u8; 64]),
            Err(ArenaError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_reset_makes_handles_stale() {
        let mut arena = arena();
        let offset = arena.alloc_bytes(ArenaKind::Shared, &7u64.to_le_bytes()).unwrap();
        let gen = arena.generation();
        assert_eq!(arena.deref::<u64>(gen, offset), Some(&7));

        let next = arena.reset().unwrap();
        assert_eq!(next, gen + 1);
        assert!(arena.deref::<u64>(gen, offset).is_none());
        assert!(matches!(
            arena.try_bytes(gen, offset, 8),
            Err(ArenaError::StaleHandle { handle, current }) if handle == gen && current == next
        ));
        assert_eq!(arena.allocated_bytes(ArenaKind::Shared), 0);
    }

    #[test]
    fn test_deref_bounds() {
        let arena = arena();
        let gen = arena.generation();
        assert!(arena.deref::<u64>(gen, -1).is_none());
        assert!(arena.deref::<u64>(gen, 0).is_none());
        assert!(arena.deref::<u64>(gen, (MIN_ARENA_SIZE - 4) as i64).is_none());
    }

    #[test]
    fn test_free_rejects_cross_kind_and_unknown() {
        let mut arena = arena();
        let offset = arena.alloc(ArenaKind::Shared, 32).unwrap();
        assert!(arena.free(ArenaKind::Heap, offset).is_err());
        assert!(arena.free(ArenaKind::Shared, -5).is_err());
        arena.free(ArenaKind::Shared, offset).unwrap();
        assert!(arena.free(ArenaKind::Shared, offset).is_err());
    }

    #[test]
    fn test_address_of_checks_region() {
        let mut arena = arena();
        let heap = arena.alloc(ArenaKind::Heap, 16).unwrap();
        assert!(arena.address_of(ArenaKind::Heap, heap).is_ok());
        assert!(arena.address_of(ArenaKind::Shared, heap).is_err());
    }

    #[test]
    fn test_theme_slots() {
        let mut arena = arena();
        assert!(arena.theme_slot(ThemeSlot::Active).is_empty());

        arena
            .set_theme_slot(ThemeSlot::Active, "sfblacktheme", "/themes/sfblacktheme", 128)
            .unwrap();
        let slot = arena.theme_slot(ThemeSlot::Active);
        assert_eq!(slot.name, "sfblacktheme");
        assert_eq!(slot.root, "/themes/sfblacktheme");
        assert_eq!(slot.table_offset, 128);

        arena.clear_theme_slot(ThemeSlot::Active).unwrap();
        assert!(arena.theme_slot(ThemeSlot::Active).is_empty());

        arena
            .set_theme_slot(ThemeSlot::Base, "hbdefault", "/themes/hbdefault", 64)
            .unwrap();
        arena.reset().unwrap();
        assert!(arena.theme_slot(ThemeSlot::Base).is_empty());
    }

    #[test]
    fn test_memory_stats_track_allocations() {
        let mut arena = arena();
        let free_before = arena.free_bytes(ArenaKind::Shared);
        let offset = arena.alloc(ArenaKind::Shared, 1000).unwrap();
        assert_eq!(
            arena.allocated_bytes(ArenaKind::Shared),
            1000 + Arena::block_overhead()
        );
        assert!(arena.free_bytes(ArenaKind::Shared) < free_before);
        arena.free(ArenaKind::Shared, offset).unwrap();
        assert_eq!(arena.free_bytes(ArenaKind::Shared), free_before);
        assert_eq!(arena.live_blocks(ArenaKind::Shared), 0);
    }
}
