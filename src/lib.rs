//! Asynchronous command bridge between a tool-calling agent and a canvas
//! design host.
//!
//! The host exposes no process-level API; a companion plugin inside it dials
//! out to this bridge over a local WebSocket. Each outbound command is
//! correlated with its eventual reply by a unique identifier, bounded by a
//! timeout, and settled exactly once. Image references are ingested and
//! normalized before they reach the host, with a placeholder fallback when
//! ingestion fails.

pub mod bridge;
pub mod error;
pub mod image;
pub mod protocol;
pub mod registry;
mod server;

pub use bridge::{Bridge, BridgeConfig};
pub use error::BridgeError;
pub use registry::{Command, CommandOutput, CommandResult};
