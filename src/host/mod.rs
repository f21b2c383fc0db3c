//! Telemetry host interface
//!
//! The gateway core never talks to the broker itself. Everything broker-side
//! (session management, reconnect/backoff, metric change tracking) lives
//! behind [`TelemetryHost`], and the control loop is its only caller. The
//! host hands state to the gateway as [`UpdateRecord`]s whose payloads are
//! opaque pre-encoded blobs; the gateway frames them for clients without
//! interpreting a single byte.

mod sim;

pub use sim::{MetricSample, SimHost};

use crate::error::Result;

/// Kind tag carried by every update record on the wire
///
/// Values match the browser client's decoder and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    /// Metric value changed
    Publish = 0,
    /// Metric (or its node) went offline; no payload follows
    Death = 1,
    /// Metric appeared, with its full initial state
    Birth = 2,
}

impl UpdateKind {
    /// Wire representation (one byte)
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One named telemetry update produced by the host
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    /// Metric identifier (node/device descriptor path)
    pub id: String,
    pub kind: UpdateKind,
    /// Pre-encoded payload blob; `None` for death records
    pub payload: Option<Vec<u8>>,
}

/// Broker-facing collaborator driven by the control loop
///
/// `run` blocks on the host's own session loop and is given a dedicated
/// thread; every other operation is called from the control loop thread and
/// must be cheap. Implementations use interior mutability.
pub trait TelemetryHost: Send + Sync {
    /// Decoded form of a client-supplied command payload
    type Payload: Send;

    /// Own the broker session loop until [`stop`](Self::stop) is called
    fn run(&self) -> Result<()>;

    /// Request a graceful end of the session loop
    fn stop(&self);

    /// Current metric state: everything when `full`, otherwise only what
    /// changed since the previous delta snapshot
    fn snapshot(&self, full: bool) -> Vec<UpdateRecord>;

    /// Decode a raw command payload blob; failures discard the command
    fn decode(&self, raw: &[u8]) -> Result<Self::Payload>;

    /// Fire-and-forget publish of a command toward a node or device.
    /// Takes the payload by value; the caller keeps nothing.
    fn command(&self, topic: &str, payload: Self::Payload);

    /// Reconnect the broker session to a new address
    fn configure(&self, address: &str);
}
