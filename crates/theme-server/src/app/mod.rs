//! Server wiring and lifecycle management.

mod init;
mod lifecycle;

pub use init::run_server;
pub use lifecycle::{check_status, stop_server};
