//! First-fit free-list allocator living inside the arena.
//!
//! Allocator root (at `root`, all fields u64/i64 little-endian):
//! ```text
//! [0: start][8: size][16: free_head][24: allocated][32: live_blocks]
//! ```
//!
//! Block header (in-band, precedes every block):
//! ```text
//! [0: block_size][8: next_free][16: tag u32][20: reserved]
//! ```
//!
//! `block_size` includes the header. The free list is kept sorted by
//! offset so neighbouring free blocks can be coalesced on `free`.

use crate::error::{ArenaError, ArenaResult};
use crate::layout::{align_up, ALIGN};
use crate::ArenaKind;
use tracing::warn;

/// Size of the in-band block header.
pub const BLOCK_HEADER_SIZE: usize = 24;

/// Smallest remainder worth splitting off as its own free block.
const MIN_SPLIT: usize = BLOCK_HEADER_SIZE + ALIGN;

const TAG_FREE: u32 = 0x4652_4545;
const TAG_USED: u32 = 0x5553_4544;

const NIL: i64 = -1;

const R_START: usize = 0;
const R_SIZE: usize = 8;
const R_FREE_HEAD: usize = 16;
const R_ALLOCATED: usize = 24;
const R_LIVE: usize = 32;

const B_SIZE: usize = 0;
const B_NEXT: usize = 8;
const B_TAG: usize = 16;

/// Bounds-checked raw access to a mapping.
pub(crate) struct RawMem {
    base: *mut u8,
    len: usize,
}

impl RawMem {
    pub(crate) fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    fn check(&self, offset: usize, width: usize) -> ArenaResult<()> {
        match offset.checked_add(width) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(ArenaError::OutOfBounds {
                offset: offset as i64,
                len: width,
            }),
        }
    }

    fn read_u64(&self, offset: usize) -> ArenaResult<u64> {
        self.check(offset, 8)?;
        // SAFETY: bounds checked above; the mapping outlives `self`.
        let v = unsafe { std::ptr::read_unaligned(self.base.add(offset) as *const u64) };
        Ok(u64::from_le(v))
    }

    fn write_u64(&mut self, offset: usize, value: u64) -> ArenaResult<()> {
        self.check(offset, 8)?;
        // SAFETY: bounds checked above; only the writable owner builds a RawMem
        // used for writes.
        unsafe { std::ptr::write_unaligned(self.base.add(offset) as *mut u64, value.to_le()) };
        Ok(())
    }

    fn read_i64(&self, offset: usize) -> ArenaResult<i64> {
        Ok(self.read_u64(offset)? as i64)
    }

    fn write_i64(&mut self, offset: usize, value: i64) -> ArenaResult<()> {
        self.write_u64(offset, value as u64)
    }

    fn read_u32(&self, offset: usize) -> ArenaResult<u32> {
        self.check(offset, 4)?;
        // SAFETY: bounds checked above.
        let v = unsafe { std::ptr::read_unaligned(self.base.add(offset) as *const u32) };
        Ok(u32::from_le(v))
    }

    fn write_u32(&mut self, offset: usize, value: u32) -> ArenaResult<()> {
        self.check(offset, 4)?;
        // SAFETY: bounds checked above.
        unsafe { std::ptr::write_unaligned(self.base.add(offset) as *mut u32, value.to_le()) };
        Ok(())
    }
}

/// Handle to one allocator root inside the arena.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FreeList {
    pub(crate) kind: ArenaKind,
    pub(crate) root: usize,
}

impl FreeList {
    /// Format `[start, start + size)` as one free block.
    pub(crate) fn init(&self, mem: &mut RawMem, start: usize, size: usize) -> ArenaResult<()> {
        mem.write_u64(self.root + R_START, start as u64)?;
        mem.write_u64(self.root + R_SIZE, size as u64)?;
        mem.write_u64(self.root + R_ALLOCATED, 0)?;
        mem.write_u64(self.root + R_LIVE, 0)?;
        if size < MIN_SPLIT {
            mem.write_i64(self.root + R_FREE_HEAD, NIL)?;
            return Ok(());
        }
        write_block(mem, start, size, NIL, TAG_FREE)?;
        mem.write_i64(self.root + R_FREE_HEAD, start as i64)
    }

    pub(crate) fn region(&self, mem: &RawMem) -> ArenaResult<(usize, usize)> {
        Ok((
            mem.read_u64(self.root + R_START)? as usize,
            mem.read_u64(self.root + R_SIZE)? as usize,
        ))
    }

    /// Whether `offset` lies inside this allocator's region.
    pub(crate) fn contains(&self, mem: &RawMem, offset: usize) -> bool {
        match self.region(mem) {
            Ok((start, size)) => offset >= start && offset < start + size,
            Err(_) => false,
        }
    }

    /// Allocate `size` bytes, returning the payload offset.
    pub(crate) fn alloc(&self, mem: &mut RawMem, size: usize) -> ArenaResult<usize> {
        let payload = align_up(size.max(1), ALIGN);
        let need = payload + BLOCK_HEADER_SIZE;

        let mut prev: Option<usize> = None;
        let mut cursor = mem.read_i64(self.root + R_FREE_HEAD)?;

        while cursor != NIL {
            let block = cursor as usize;
            let block_size = mem.read_u64(block + B_SIZE)? as usize;
            let next = mem.read_i64(block + B_NEXT)?;

            if block_size >= need {
                let replacement = if block_size - need >= MIN_SPLIT {
                    let rest = block + need;
                    write_block(mem, rest, block_size - need, next, TAG_FREE)?;
                    write_block(mem, block, need, NIL, TAG_USED)?;
                    rest as i64
                } else {
                    write_block(mem, block, block_size, NIL, TAG_USED)?;
                    next
                };
                self.link(mem, prev, replacement)?;

                let used = mem.read_u64(block + B_SIZE)?;
                let allocated = mem.read_u64(self.root + R_ALLOCATED)?;
                mem.write_u64(self.root + R_ALLOCATED, allocated + used)?;
                let live = mem.read_u64(self.root + R_LIVE)?;
                mem.write_u64(self.root + R_LIVE, live + 1)?;

                return Ok(block + BLOCK_HEADER_SIZE);
            }

            prev = Some(block);
            cursor = next;
        }

        Err(ArenaError::OutOfMemory {
            kind: self.kind,
            requested: size,
        })
    }

    /// Release the block whose payload starts at `offset`.
    ///
    /// Offsets that are not live allocations of this allocator are rejected
    /// and leave the list untouched.
    pub(crate) fn free(&self, mem: &mut RawMem, offset: usize) -> ArenaResult<()> {
        let invalid = || ArenaError::InvalidOffset {
            kind: self.kind,
            offset: offset as i64,
        };

        let (start, size) = self.region(mem)?;
        if offset < start + BLOCK_HEADER_SIZE || offset >= start + size || offset % ALIGN != 0 {
            warn!(kind = ?self.kind, offset, "Rejecting free outside allocator region");
            return Err(invalid());
        }
        let block = offset - BLOCK_HEADER_SIZE;
        if mem.read_u32(block + B_TAG)? != TAG_USED {
            warn!(kind = ?self.kind, offset, "Rejecting free of unallocated block");
            return Err(invalid());
        }
        let block_size = mem.read_u64(block + B_SIZE)? as usize;

        // Find the insertion point in the address-ordered list.
        let mut prev: Option<usize> = None;
        let mut cursor = mem.read_i64(self.root + R_FREE_HEAD)?;
        while cursor != NIL && (cursor as usize) < block {
            prev = Some(cursor as usize);
            cursor = mem.read_i64(cursor as usize + B_NEXT)?;
        }

        let allocated = mem.read_u64(self.root + R_ALLOCATED)?;
        mem.write_u64(
            self.root + R_ALLOCATED,
            allocated.saturating_sub(block_size as u64),
        )?;
        let live = mem.read_u64(self.root + R_LIVE)?;
        mem.write_u64(self.root + R_LIVE, live.saturating_sub(1))?;

        // Merge with the following free block.
        let mut merged_size = block_size;
        let mut next = cursor;
        if next != NIL && block + block_size == next as usize {
            let next_block = next as usize;
            merged_size += mem.read_u64(next_block + B_SIZE)? as usize;
            next = mem.read_i64(next_block + B_NEXT)?;
            mem.write_u32(next_block + B_TAG, 0)?;
        }

        // Merge with the preceding free block.
        if let Some(p) = prev {
            let prev_size = mem.read_u64(p + B_SIZE)? as usize;
            if p + prev_size == block {
                write_block(mem, p, prev_size + merged_size, next, TAG_FREE)?;
                mem.write_u32(block + B_TAG, 0)?;
                return Ok(());
            }
        }

        write_block(mem, block, merged_size, next, TAG_FREE)?;
        self.link(mem, prev, block as i64)
    }

    /// Payload capacity of a live allocation.
    pub(crate) fn capacity(&self, mem: &RawMem, offset: usize) -> ArenaResult<usize> {
        let invalid = || ArenaError::InvalidOffset {
            kind: self.kind,
            offset: offset as i64,
        };
        if !self.contains(mem, offset) || offset < BLOCK_HEADER_SIZE {
            return Err(invalid());
        }
        let block = offset - BLOCK_HEADER_SIZE;
        if mem.read_u32(block + B_TAG)? != TAG_USED {
            return Err(invalid());
        }
        Ok(mem.read_u64(block + B_SIZE)? as usize - BLOCK_HEADER_SIZE)
    }

    /// Sum of free payload capacity.
    pub(crate) fn free_bytes(&self, mem: &RawMem) -> ArenaResult<usize> {
        let mut total = 0;
        let mut cursor = mem.read_i64(self.root + R_FREE_HEAD)?;
        while cursor != NIL {
            let block = cursor as usize;
            total += (mem.read_u64(block + B_SIZE)? as usize).saturating_sub(BLOCK_HEADER_SIZE);
            cursor = mem.read_i64(block + B_NEXT)?;
        }
        Ok(total)
    }

    /// Bytes held by live blocks, headers included.
    pub(crate) fn allocated_bytes(&self, mem: &RawMem) -> ArenaResult<usize> {
        Ok(mem.read_u64(self.root + R_ALLOCATED)? as usize)
    }

    pub(crate) fn live_blocks(&self, mem: &RawMem) -> ArenaResult<usize> {
        Ok(mem.read_u64(self.root + R_LIVE)? as usize)
    }

    fn link(&self, mem: &mut RawMem, prev: Option<usize>, next: i64) -> ArenaResult<()> {
        match prev {
            Some(p) => mem.write_i64(p + B_NEXT, next),
            None => mem.write_i64(self.root + R_FREE_HEAD, next),
        }
    }
}

fn write_block(mem: &mut RawMem, block: usize, size: usize, next: i64, tag: u32) -> ArenaResult<()> {
    mem.write_u64(block + B_SIZE, size as u64)?;
    mem.write_i64(block + B_NEXT, next)?;
    mem.write_u32(block + B_TAG, tag)?;
    mem.write_u32(block + B_TAG + 4, 0)
}
