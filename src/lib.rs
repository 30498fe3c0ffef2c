pub mod config;
pub mod errors;
pub mod reminder;
pub mod scheduler;
pub mod server;
pub mod slack;
pub mod store;
pub mod telemetry;

// Domain types and ports live in the common crate; re-exported for callers.
pub use nudge_common as common;
