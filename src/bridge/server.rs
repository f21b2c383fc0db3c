//! WebSocket transport adapter and connection registry
//!
//! Owns the TCP listener, tracks live client sessions, and translates
//! socket events into queued actions for the control loop:
//!
//! - connection open  -> registry insert + one queued `Resync`
//! - connection close -> registry erase (idempotent)
//! - binary message   -> classified by the wire codec and queued, or dropped
//!
//! # Thread model
//!
//! The accept loop runs on its own thread (`ws-accept`) with a non-blocking
//! listener so the accepting flag is observed promptly. Each accepted
//! session gets a named `ws-conn-N` thread that performs the WebSocket
//! handshake and then polls the socket with a short read timeout - the same
//! timeout idiom the command receiver uses to interleave shutdown checks
//! with blocking reads.
//!
//! The session socket lives in an `Arc<Mutex<..>>` owned by its reader
//! thread. Every [`Connection`] handle holds only a `Weak` to it, so a
//! handle taken from a registry snapshot may find the session already gone;
//! senders treat that as a routine miss, not an error. The registry lock is
//! held only for in-memory map operations, never across socket I/O.

use crate::bridge::queue::{Action, ActionQueue};
use crate::bridge::wire::{self, InboundRequest};
use crate::error::{Error, Result};
use log::{debug, error, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::{HandshakeError, Message, WebSocket};

/// How long a session read blocks before releasing the socket lock
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Sleep between accept polls when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(10);

type Socket = WebSocket<TcpStream>;

/// Identity of one client session, unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Weak handle to one live client session
///
/// Cheap to clone and compared by identity, not by socket state. The handle
/// carries no ownership: once the session's reader thread exits, every
/// outstanding handle goes dead and sends through it become no-ops.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    socket: Weak<Mutex<Socket>>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Handle with no backing session, for exercising dead-session paths
    #[cfg(test)]
    pub(crate) fn dangling(id: u64) -> Self {
        Self {
            id: ConnectionId(id),
            socket: Weak::new(),
        }
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection({})", self.id)
    }
}

/// Outbound side of the transport, as seen by the control loop
pub trait FrameSink: Send + Sync {
    /// Best-effort unicast; transport failures are logged, never returned
    fn send(&self, frame: &[u8], connection: &Connection);

    /// Unicast to every registered session; returns the attempt count,
    /// failures included
    fn broadcast(&self, frame: &[u8]) -> usize;
}

/// WebSocket server: listener, registry, and action production
pub struct GatewayServer {
    listener: TcpListener,
    registry: Mutex<HashMap<ConnectionId, Connection>>,
    queue: Arc<ActionQueue>,
    accepting: AtomicBool,
    next_id: AtomicU64,
}

impl GatewayServer {
    /// Bind the listener; the accept loop starts with [`run`](Self::run)
    pub fn bind(addr: &str, queue: Arc<ActionQueue>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            registry: Mutex::new(HashMap::new()),
            queue,
            accepting: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        })
    }

    /// Address the listener actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of currently registered sessions
    pub fn session_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Accept loop; returns once [`stop`](Self::stop) has been called
    pub fn run(self: Arc<Self>) -> Result<()> {
        info!("WebSocket server listening on {}", self.local_addr()?);

        while self.accepting.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let server = Arc::clone(&self);
                    let spawned = std::thread::Builder::new()
                        .name(format!("ws-conn-{}", id.raw()))
                        .spawn(move || server.serve_connection(id, stream, addr));
                    if let Err(e) = spawned {
                        error!("Failed to spawn session thread for {}: {}", addr, e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }

        info!("WebSocket accept loop stopped");
        Ok(())
    }

    /// Stop accepting and close every registered session
    pub fn stop(&self) {
        self.accepting.store(false, Ordering::Relaxed);

        let connections: Vec<Connection> = {
            let mut registry = self.registry.lock();
            registry.drain().map(|(_, connection)| connection).collect()
        };

        for connection in connections {
            let Some(socket) = connection.socket.upgrade() else {
                continue;
            };
            let mut ws = socket.lock();
            let frame = CloseFrame {
                code: CloseCode::Away,
                reason: "shutting down".into(),
            };
            if let Err(e) = ws.close(Some(frame)) {
                debug!("Close of {} failed: {}", connection.id, e);
            }
        }

        info!("Gateway server stopped");
    }

    /// Upgrade a freshly accepted TCP stream to a session socket
    ///
    /// Accepted sockets do not inherit the listener's non-blocking mode on
    /// every platform, so the blocking handshake mode is set explicitly.
    fn handshake(stream: TcpStream) -> Result<Socket> {
        stream.set_nonblocking(false)?;
        let socket = match tungstenite::accept(stream) {
            Ok(socket) => socket,
            Err(HandshakeError::Failure(e)) => return Err(Error::Transport(e)),
            // Unreachable on a blocking stream, mapped for completeness
            Err(HandshakeError::Interrupted(_)) => {
                return Err(Error::Transport(tungstenite::Error::Io(
                    std::io::ErrorKind::WouldBlock.into(),
                )))
            }
        };
        socket.get_ref().set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(socket)
    }

    /// Per-session thread: handshake, then poll the socket until the
    /// session or the server goes away
    fn serve_connection(&self, id: ConnectionId, stream: TcpStream, addr: SocketAddr) {
        let socket = match Self::handshake(stream) {
            Ok(socket) => socket,
            Err(e) => {
                debug!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };

        let socket = Arc::new(Mutex::new(socket));
        let connection = Connection {
            id,
            socket: Arc::downgrade(&socket),
        };
        self.open(connection.clone());
        info!("Client connected: {} ({})", addr, id);

        loop {
            if !self.accepting.load(Ordering::Relaxed) {
                break;
            }

            // Hold the socket lock only for one bounded read so sends from
            // the control loop can interleave.
            let message = {
                let mut ws = socket.lock();
                match ws.read() {
                    Ok(message) => Some(message),
                    Err(tungstenite::Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        None
                    }
                    Err(tungstenite::Error::ConnectionClosed)
                    | Err(tungstenite::Error::AlreadyClosed) => break,
                    Err(e) => {
                        debug!("Read error on {}: {}", id, e);
                        break;
                    }
                }
            };

            match message {
                Some(Message::Binary(data)) => self.receive(&connection, &data),
                Some(Message::Close(_)) => break,
                Some(_) => {} // text/ping/pong carry no protocol meaning here
                None => {}
            }
        }

        self.close(&connection);
        info!("Client disconnected: {} ({})", addr, id);
        // Dropping `socket` here invalidates every outstanding handle.
    }

    /// Register a session and queue its initial full-state delivery
    ///
    /// A delta tick can land between the insert and the resync dispatch,
    /// so a fresh session may see one delta frame before its full
    /// snapshot; client decoders tolerate ids they have not seen yet.
    fn open(&self, connection: Connection) {
        self.registry.lock().insert(connection.id, connection.clone());
        self.queue.push(Action::Resync { origin: connection });
    }

    /// Remove a session; unknown ids are a no-op
    fn close(&self, connection: &Connection) {
        self.registry.lock().remove(&connection.id);
    }

    /// Decode one raw client frame into a queued action
    fn receive(&self, connection: &Connection, frame: &[u8]) {
        match wire::classify(frame) {
            Some(InboundRequest::Resync) => self.queue.push(Action::Resync {
                origin: connection.clone(),
            }),
            Some(InboundRequest::Command { body }) => self.queue.push(Action::Command {
                origin: connection.clone(),
                frame: body,
            }),
            Some(InboundRequest::Configure { body }) => self.queue.push(Action::Configure {
                origin: connection.clone(),
                frame: body,
            }),
            None => debug!(
                "Ignoring frame with unrecognized discriminator from {}",
                connection.id
            ),
        }
    }
}

impl FrameSink for GatewayServer {
    fn send(&self, frame: &[u8], connection: &Connection) {
        let Some(socket) = connection.socket.upgrade() else {
            debug!("Dropping frame for {}: session already closed", connection.id);
            return;
        };
        let mut ws = socket.lock();
        if let Err(e) = ws.send(Message::Binary(frame.to_vec())) {
            debug!("Send to {} failed: {}", connection.id, e);
        }
    }

    fn broadcast(&self, frame: &[u8]) -> usize {
        // Snapshot under the lock, send outside it: lifecycle events must
        // never wait on slow sockets.
        let recipients: Vec<Connection> = self.registry.lock().values().cloned().collect();
        for connection in &recipients {
            self.send(frame, connection);
        }
        recipients.len()
    }
}
