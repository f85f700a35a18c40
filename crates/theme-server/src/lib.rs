//! hbthemeserver: serves theme resources to every client process from one
//! shared arena.
//!
//! - [`ServerState`]: arena, reference-counted caches and per-session holds
//! - [`ThemeDispatcher`]: the [`theme_ipc::RequestHandler`] wiring requests
//!   onto the state under one lock
//! - [`RefCountedCache`]: lookup/unload bookkeeping with optional retention
//!   of unused entries

pub mod cache;
pub mod dispatch;
mod error;
pub mod state;

pub use cache::{CacheStats, RefCountedCache, Released};
pub use dispatch::{ThemeDispatcher, STOP_GRACE};
pub use error::{ServerError, ServerResult};
pub use state::{DataKey, ServerState, ThemeSettings};
