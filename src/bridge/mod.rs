//! Real-time bridging engine
//!
//! Turns inbound client frames into host operations and host state into
//! outbound client frames. Data flows one way through four parts:
//!
//! ```text
//! socket threads -> wire (decode) -> queue -> control loop -> host calls
//!                                                          -> server sends (wire encode)
//! ```
//!
//! The queue and the connection registry are the only shared mutable state;
//! each has its own lock, the two are never held together, and neither is
//! ever held across socket I/O.

pub mod control;
pub mod queue;
pub mod server;
pub mod wire;

pub use control::ControlLoop;
pub use queue::{Action, ActionQueue};
pub use server::{Connection, ConnectionId, FrameSink, GatewayServer};
