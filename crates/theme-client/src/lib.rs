//! Client side of the theme resource server.
//!
//! ```text
//! ┌────────────────┐  Request frames   ┌──────────────────┐
//! │  ThemeClient   │ ────────────────► │  hbthemeserver   │
//! │  (per process) │ ◄──────────────── │                  │
//! └───────┬────────┘  Reply frames +   └────────┬─────────┘
//!         │           notifications             │ read/write
//!         │ read-only mapping                   ▼
//!         └────────────────────────────► themeserver_chunk
//! ```
//!
//! - [`ThemeClient`]: lazy connection, typed lookups that degrade to
//!   `Invalid`, arena access by generation-tagged handle
//! - [`Transport`]: byte-stream and call-based bindings over one
//!   demultiplexing reader per connection
//! - [`EventQueue`]: theme notifications, drained on the application's turn
//! - [`AsyncRequestQueue`]: serialized async icon lookups with cancellation
//! - [`ResourceLoader`]: falls back to a private arena when the server
//!   cannot help

mod bootstrap;
mod client;
mod demux;
mod error;
mod events;
mod fallback;
mod queue;
mod transport;

#[cfg(test)]
mod tests;

pub use bootstrap::{handshake, Bootstrap, ConnectionState, RetryPolicy, Session};
pub use client::{ClientOptions, ThemeClient};
pub use demux::{next_epoch, Connection, RequestIds};
pub use error::{ClientError, ClientResult};
pub use events::{EventQueue, ThemeEvent};
pub use fallback::{Loaded, Origin, ResourceLoader, LOCAL_ARENA_SIZE};
pub use queue::{AsyncRequestQueue, IconService, Ticket};
pub use transport::{CallTransport, StreamTransport, Transport, TransportKind};
