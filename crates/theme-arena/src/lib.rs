//! Shared memory resource arena for the theme server.
//!
//! The server maps one named POSIX shared memory object read/write and
//! carves it into two first-fit allocators: a small *heap* for theme index
//! tables and a large *shared* region for resource payloads and composite
//! blobs.
//! Clients map the same object read-only and resolve the `(generation,
//! offset)` handles they receive over IPC.
//!
//! ```text
//! ┌─────────────────┐   IconLookup    ┌─────────────────┐
//! │     Client      │ ──────────────► │  hbthemeserver  │
//! │  (read-only)    │ ◄────────────── │  (read/write)   │
//! └────────┬────────┘  ArenaRef       └────────┬────────┘
//!          │ deref / bytes                     │ alloc / write / free
//!          ▼                                   ▼
//! ┌─────────────────────────────────────────────────────┐
//! │  Header | roots | Heap region | Shared region       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! A handle is only honoured while its generation matches the header.
//! [`Arena::reset`] bumps the generation, so every handle minted before a
//! reset fails to dereference instead of reading recycled memory.
//!
//! See [`layout`] for the byte layout.

pub mod error;
pub mod layout;

#[cfg(unix)]
mod allocator;
#[cfg(unix)]
mod arena;
#[cfg(unix)]
pub mod shm;

pub use error::{ArenaError, ArenaResult};
pub use layout::{ThemeSlot, ThemeSlotInfo};

#[cfg(unix)]
pub use arena::{Arena, ArenaValue, MIN_ARENA_SIZE};

/// Selects one of the two allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaKind {
    /// Small server-side structures such as theme index tables.
    Heap,
    /// Resource payloads.
    Shared,
}
