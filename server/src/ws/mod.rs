pub mod actor;
pub mod handler;
pub mod protocol;

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one accepted transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Pre-encoded JSON event, shared between every recipient of a broadcast.
    Text(Arc<str>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

/// Sender half of a connection's outbound queue.
/// Bounded: a client that stops reading loses frames instead of growing memory.
pub type ConnectionSender = mpsc::Sender<Outbound>;

/// Handle to a live connection, shared by the actor and the hub.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    /// Identity proven at handshake (JWT `sub`), if the transport required one.
    pub verified_user: Option<String>,
    sender: ConnectionSender,
}

impl Connection {
    /// Create a connection handle and the receiver its writer task drains.
    pub fn new(verified_user: Option<String>, buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            verified_user,
            sender: tx,
        };
        (conn, rx)
    }

    pub fn sender(&self) -> &ConnectionSender {
        &self.sender
    }

    /// Queue a frame without waiting. Returns false if the queue is full or closed.
    pub fn send(&self, frame: Outbound) -> bool {
        self.sender.try_send(frame).is_ok()
    }
}
