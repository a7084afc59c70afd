//! Presence registry.
//!
//! Tracks which sessions of which users currently hold an open connection:
//! `user -> session -> connection`. A user is online exactly while it has at
//! least one session entry; empty users are pruned in the same locked step
//! that removes their last session.

use crate::connection::ConnectionId;
use crate::identity::{SessionId, UserId};
use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

/// The sessions of one user.
pub type Sessions = HashMap<SessionId, ConnectionId>;

/// In-memory `user -> session -> connection` table.
///
/// Operations lock only the bucket holding the user, so concurrent updates
/// for different users never contend.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    users: DashMap<UserId, Sessions>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a session.
    ///
    /// Returns the connection that previously held the session, if it was a
    /// different one. The registry does not close it.
    pub fn register(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Option<ConnectionId> {
        let mut sessions = self.users.entry(user_id.clone()).or_default();
        let previous = sessions.insert(session_id.clone(), connection_id.clone());

        debug!(
            user = %user_id,
            session = %session_id,
            connection = %connection_id,
            sessions = sessions.len(),
            "Presence: session registered"
        );

        previous.filter(|prev| prev != connection_id)
    }

    /// Remove a session, whichever connection holds it.
    ///
    /// Returns the removed connection ID.
    pub fn deregister(&self, user_id: &UserId, session_id: &SessionId) -> Option<ConnectionId> {
        self.remove_session(user_id, session_id, None)
    }

    /// Remove a session only if it is still held by `connection_id`.
    ///
    /// A connection that was superseded by a newer one for the same session
    /// must not remove its replacement.
    pub fn deregister_connection(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> bool {
        self.remove_session(user_id, session_id, Some(connection_id))
            .is_some()
    }

    fn remove_session(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        expected: Option<&ConnectionId>,
    ) -> Option<ConnectionId> {
        let mut removed = None;

        self.users.remove_if_mut(user_id, |_, sessions| {
            let holds = match (sessions.get(session_id), expected) {
                (Some(current), Some(expected)) => current == expected,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if holds {
                removed = sessions.remove(session_id);
            }
            sessions.is_empty()
        });

        if let Some(connection_id) = &removed {
            debug!(
                user = %user_id,
                session = %session_id,
                connection = %connection_id,
                online = self.users.contains_key(user_id),
                "Presence: session deregistered"
            );
        }

        removed
    }

    /// All sessions of a user, empty if the user is offline or unknown.
    #[must_use]
    pub fn sessions_of(&self, user_id: &UserId) -> Sessions {
        self.users
            .get(user_id)
            .map(|sessions| sessions.clone())
            .unwrap_or_default()
    }

    /// Users with at least one session, sorted.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    /// Whether a user has at least one session.
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    /// Number of online users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of registered sessions across all users.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.users.iter().map(|e| e.value().len()).sum()
    }
}
