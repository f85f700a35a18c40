//! Integration tests for the theme client against a scripted server.
//!
//! - `harness.rs`       - MockThemeServer with a real shared arena
//! - `transport.rs`     - I. Transport & request ids
//! - `notifications.rs` - II. Notification demultiplexing & ordering
//! - `degraded.rs`      - III. Bootstrap failure & reconnect
//! - `mismatch.rs`      - IV. Protocol mismatch handling
//! - `multipart.rs`     - V. Multi-part pieces & batch unload padding
//! - `cancellation.rs`  - VI. Async queue cancellation
//! - `timeout.rs`       - VII. Request timeout & late replies
//! - `fallback.rs`      - VIII. Local fallback & stale handles

mod cancellation;
mod degraded;
mod mismatch;
mod transport;
