//! Setu - Sparkplug telemetry WebSocket gateway
//!
//! Bridges one broker-facing telemetry host to any number of live WebSocket
//! client sessions. Clients speak a compact binary protocol (resync,
//! command, configure requests in; length-prefixed update records out);
//! the host is reached only through the [`host::TelemetryHost`] trait.
//!
//! Three threads of control: the WebSocket server's accept/session threads,
//! the single control loop, and the host's own session loop. See
//! [`bridge`] for the engine and its concurrency rules.

pub mod bridge;
pub mod config;
pub mod error;
pub mod host;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use error::{Error, Result};
