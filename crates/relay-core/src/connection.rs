//! Live transport connections.
//!
//! Every accepted transport gets a [`ConnectionHandle`] stored in the
//! [`ConnectionTable`]. Frames reach the transport task through the handle's
//! unbounded outbound channel, so delivery never waits on socket I/O.

use crate::identity::Identity;
use dashmap::DashMap;
use relay_protocol::Frame;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::trace;

/// Disambiguates IDs generated within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Transport-assigned connection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted by the transport, not yet registered.
    Establishing,
    /// Registered (or accepted anonymously) and receiving events.
    Online,
    /// Cleaned up. Terminal.
    Closed,
}

/// Work item for a connection's transport task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Write a frame.
    Frame(Arc<Frame>),
    /// Send an error frame with the given code and close the transport.
    Close { code: u16, reason: String },
}

/// Receiving half of a connection's outbound channel.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

/// A live connection as seen by the gateway.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Option<Identity>,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Create a handle in the `Establishing` state together with the
    /// receiver its transport task drains.
    #[must_use]
    pub fn new(id: ConnectionId, identity: Option<Identity>) -> (Self, OutboundReceiver) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            identity,
            state: ConnectionState::Establishing,
            outbound,
        };
        (handle, rx)
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The `(user, session)` pair this connection was tagged with.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Queue a frame. Returns `false` if the transport task is gone.
    pub fn deliver(&self, frame: Arc<Frame>) -> bool {
        self.outbound.send(Outbound::Frame(frame)).is_ok()
    }

    /// Ask the transport task to close. Returns `false` if it is gone.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Every live connection, registered or anonymous.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Add a connection.
    pub fn insert(&self, handle: ConnectionHandle) {
        self.connections.insert(handle.id.clone(), handle);
    }

    /// Remove a connection, returning its handle.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.remove(id).map(|(_, handle)| handle)
    }

    /// Current state of a connection, `None` once it has been removed.
    #[must_use]
    pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.connections.get(id).map(|c| c.state)
    }

    /// Move a connection to a new state.
    pub fn set_state(&self, id: &ConnectionId, state: ConnectionState) {
        if let Some(mut handle) = self.connections.get_mut(id) {
            trace!(connection = %id, from = ?handle.state, to = ?state, "State transition");
            handle.state = state;
        }
    }

    /// Deliver a frame to one connection.
    ///
    /// Returns `false` if the connection is unknown or its task has gone away.
    pub fn deliver(&self, id: &ConnectionId, frame: Arc<Frame>) -> bool {
        match self.connections.get(id) {
            Some(handle) => handle.deliver(frame),
            None => false,
        }
    }

    /// Ask one connection to close.
    pub fn close(&self, id: &ConnectionId, code: u16, reason: &str) -> bool {
        match self.connections.get(id) {
            Some(handle) => handle.close(code, reason),
            None => false,
        }
    }

    /// Deliver a frame to every connection.
    ///
    /// Returns the number of connections that accepted it.
    pub fn broadcast(&self, frame: Arc<Frame>) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.deliver(Arc::clone(&frame)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_table_insert_remove() {
        let table = ConnectionTable::new();
        let (handle, _rx) = ConnectionHandle::new("c1".into(), None);
        table.insert(handle);

        assert_eq!(table.len(), 1);
        assert_eq!(table.state(&"c1".into()), Some(ConnectionState::Establishing));

        table.set_state(&"c1".into(), ConnectionState::Online);
        assert_eq!(table.state(&"c1".into()), Some(ConnectionState::Online));

        assert!(table.remove(&"c1".into()).is_some());
        assert!(table.is_empty());
        assert!(table.remove(&"c1".into()).is_none());
    }

    #[tokio::test]
    async fn test_deliver_and_broadcast() {
        let table = ConnectionTable::new();
        let (h1, mut rx1) = ConnectionHandle::new("c1".into(), None);
        let (h2, rx2) = ConnectionHandle::new("c2".into(), None);
        table.insert(h1);
        table.insert(h2);

        assert!(table.deliver(&"c1".into(), Arc::new(Frame::ping())));
        assert!(!table.deliver(&"missing".into(), Arc::new(Frame::ping())));
        assert!(matches!(rx1.recv().await, Some(Outbound::Frame(_))));

        // A dropped receiver no longer counts as delivered.
        drop(rx2);
        assert_eq!(table.broadcast(Arc::new(Frame::ping())), 1);
    }

    #[tokio::test]
    async fn test_close_request() {
        let table = ConnectionTable::new();
        let (handle, mut rx) = ConnectionHandle::new("c1".into(), None);
        table.insert(handle);

        assert!(table.close(&"c1".into(), 4001, "superseded"));
        match rx.recv().await {
            Some(Outbound::Close { code, reason }) => {
                assert_eq!(code, 4001);
                assert_eq!(reason, "superseded");
            }
            other => panic!("expected close, got {:?}", other),
        }
    }
}
