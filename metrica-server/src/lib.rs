//! metrica collector server.
//!
//! Exposed as a library so the router can be driven in tests.

pub mod api;
pub mod shutdown;

pub use api::{router, ApiState};
pub use shutdown::ShutdownManager;
