//! Presence broadcaster.
//!
//! Sends the full set of online users to every live connection. Snapshots
//! are numbered and fanned out one at a time, so each connection sees
//! revisions in increasing order and the last one it receives reflects the
//! latest registry state.

use crate::connection::{ConnectionId, ConnectionTable};
use crate::registry::PresenceRegistry;
use relay_protocol::Frame;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A numbered list of online users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSnapshot {
    pub revision: u64,
    pub user_ids: Vec<String>,
}

impl PresenceSnapshot {
    /// Build the wire frame for this snapshot.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        Frame::presence_snapshot(self.revision, self.user_ids.clone())
    }
}

/// Fans out presence snapshots.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    registry: Arc<PresenceRegistry>,
    connections: Arc<ConnectionTable>,
    /// Last revision handed out. Held while a snapshot is fanned out.
    revision: Mutex<u64>,
}

impl PresenceBroadcaster {
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            registry,
            connections,
            revision: Mutex::new(0),
        }
    }

    /// The current snapshot without advancing the revision.
    #[must_use]
    pub fn current(&self) -> PresenceSnapshot {
        let revision = self.revision.lock().unwrap_or_else(PoisonError::into_inner);
        self.snapshot_at(*revision)
    }

    /// Take a new snapshot and deliver it to every connection.
    ///
    /// Returns the snapshot and the number of connections reached.
    pub fn broadcast(&self) -> (PresenceSnapshot, usize) {
        let mut revision = self.revision.lock().unwrap_or_else(PoisonError::into_inner);
        *revision += 1;

        let snapshot = self.snapshot_at(*revision);
        let reached = self.connections.broadcast(Arc::new(snapshot.to_frame()));

        debug!(
            revision = snapshot.revision,
            online = snapshot.user_ids.len(),
            reached,
            "Presence: snapshot broadcast"
        );

        (snapshot, reached)
    }

    /// Deliver the current snapshot to one connection.
    pub fn send_current(&self, connection_id: &ConnectionId) -> bool {
        let revision = self.revision.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot_at(*revision);
        self.connections
            .deliver(connection_id, Arc::new(snapshot.to_frame()))
    }

    fn snapshot_at(&self, revision: u64) -> PresenceSnapshot {
        PresenceSnapshot {
            revision,
            user_ids: self
                .registry
                .online_user_ids()
                .into_iter()
                .map(|u| u.as_str().to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionHandle, Outbound};
    use crate::identity::{SessionId, UserId};

    fn setup() -> (Arc<PresenceRegistry>, Arc<ConnectionTable>, PresenceBroadcaster) {
        let registry = Arc::new(PresenceRegistry::new());
        let connections = Arc::new(ConnectionTable::new());
        let broadcaster = PresenceBroadcaster::new(Arc::clone(&registry), Arc::clone(&connections));
        (registry, connections, broadcaster)
    }

    fn expect_snapshot(outbound: Option<Outbound>) -> (u64, Vec<String>) {
        match outbound {
            Some(Outbound::Frame(frame)) => match frame.as_ref() {
                Frame::PresenceSnapshot { revision, user_ids } => (*revision, user_ids.clone()),
                other => panic!("expected snapshot, got {:?}", other),
            },
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_anonymous_connections() {
        let (registry, connections, broadcaster) = setup();
        let (anon, mut anon_rx) = ConnectionHandle::new("anon".into(), None);
        connections.insert(anon);

        registry.register(&UserId::from("bob"), &SessionId::from("s1"), &"c1".into());
        registry.register(&UserId::from("alice"), &SessionId::from("s1"), &"c2".into());

        let (snapshot, reached) = broadcaster.broadcast();
        assert_eq!(reached, 1);
        assert_eq!(snapshot.user_ids, vec!["alice", "bob"]);

        let (revision, users) = expect_snapshot(anon_rx.recv().await);
        assert_eq!(revision, 1);
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_revisions_increase() {
        let (_registry, connections, broadcaster) = setup();
        let (handle, mut rx) = ConnectionHandle::new("c1".into(), None);
        connections.insert(handle);

        broadcaster.broadcast();
        broadcaster.broadcast();
        assert_eq!(broadcaster.current().revision, 2);

        assert!(broadcaster.send_current(&"c1".into()));

        let revisions: Vec<u64> = vec![
            expect_snapshot(rx.recv().await).0,
            expect_snapshot(rx.recv().await).0,
            expect_snapshot(rx.recv().await).0,
        ];
        assert_eq!(revisions, vec![1, 2, 2]);
    }
}
