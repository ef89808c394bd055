//! Verified connections and the relay-wide membership list.
//!
//! The [`Registry`] is the single source of truth for who is currently
//! verified: a connection is appended when its handshake succeeds and removed
//! when its session closes, and the interior collection is never handed out
//! mutably. Broadcast delivery lives here too, working from a snapshot so
//! writes never hold the membership lock.

use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, warn};

use crate::frame::write_message;

/// Identity of one verified connection. Distinct from the display label:
/// two peers may join under the same label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// One verified peer: display identity, peer address for logging, and the
/// exclusively-owned write half of its transport.
pub struct ConnectionHandle<W> {
    id: ConnectionId,
    identity: String,
    peer: SocketAddr,
    writer: Mutex<W>,
}

impl<W> ConnectionHandle<W> {
    pub fn new(id: ConnectionId, identity: String, peer: SocketAddr, writer: W) -> Self {
        Self {
            id,
            identity,
            peer,
            writer: Mutex::new(writer),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl<W> ConnectionHandle<W>
where
    W: AsyncWrite + Unpin,
{
    /// Writes one framed message to this peer.
    pub async fn send(&self, message: &str) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await
    }

    /// Best-effort close of the write half.
    pub async fn shutdown(&self) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

impl<W> fmt::Display for ConnectionHandle<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identity, self.peer)
    }
}

/// Ordered collection of verified connections; insertion order is join order.
pub struct Registry<W> {
    connections: Mutex<Vec<Arc<ConnectionHandle<W>>>>,
    next_id: AtomicU64,
}

impl<W> Registry<W> {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Appends a connection that just completed verification.
    pub async fn register(&self, handle: Arc<ConnectionHandle<W>>) {
        let mut connections = self.connections.lock().await;
        connections.push(handle);
        debug!(total = connections.len(), "connection registered");
    }

    /// Removes a connection if it is still registered. Removing one that was
    /// already removed is a no-op, which keeps session close idempotent.
    pub async fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle<W>>> {
        let mut connections = self.connections.lock().await;
        let index = connections.iter().position(|handle| handle.id() == id)?;
        Some(connections.remove(index))
    }

    /// Clones the current membership so callers can iterate without holding
    /// the lock. A peer removed after the snapshot may still receive one
    /// in-flight broadcast; it can never be visited twice.
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle<W>>> {
        self.connections.lock().await.clone()
    }

    /// Display identities in join order.
    pub async fn list_identities(&self) -> Vec<String> {
        self.connections
            .lock()
            .await
            .iter()
            .map(|handle| handle.identity().to_string())
            .collect()
    }
}

impl<W> Default for Registry<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> Registry<W>
where
    W: AsyncWrite + Unpin,
{
    /// Fans `payload` out to every registered connection except the sender,
    /// in join order. Each write is isolated: a broken recipient is logged
    /// and skipped, and is left to its own session to clean up.
    pub async fn broadcast(&self, sender: ConnectionId, payload: &str) {
        let connections = self.snapshot().await;
        debug!(
            recipients = connections.len().saturating_sub(1),
            "broadcasting message"
        );
        for connection in connections {
            if connection.id() == sender {
                continue;
            }
            if let Err(error) = connection.send(payload).await {
                warn!(peer = %connection, ?error, "failed to deliver broadcast");
            }
        }
    }
}
