//! Theme roots, resource production and theme index tables.
//!
//! Shared by the server and by the client's degraded mode:
//!
//! - [`ThemeRoots`] resolves logical names (`qtg_large_info`,
//!   `hbpushbutton.css`) against the operator, active and base theme tiers.
//! - [`ResourceProducer`] turns the resolved file into an arena resource.
//! - [`index`] builds and reads the per-tier icon tables stored in the arena
//!   heap.
//! - [`composite`] packs multi-part icons into a single blob.

pub mod composite;
mod error;
pub mod index;
mod producer;
mod roots;

pub use composite::{encode_composite, CompositePiece, CompositeView, PieceData};
pub use error::{ResourceError, ResourceResult};
pub use index::{build_theme_indexes, resolve_icon, IndexItem, ThemeIndexView};
pub use producer::{
    icon_format_for, image_dimensions, FileProducer, ResourceProducer, MAX_RESOURCE_SIZE,
    PIXEL_FORMAT_ENCODED,
};
pub use roots::{
    ResourceKind, ThemeRoots, DEVICE_PROFILES_FILE, ICON_EXTENSIONS, MIRRORED_DIR,
    TYPEFACES_FILE,
};
