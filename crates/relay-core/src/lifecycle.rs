//! Connection lifecycle.
//!
//! The [`ConnectionManager`] owns every live connection. It moves each one
//! through `Establishing -> Online -> Closed`, keeps the presence registry in
//! step, and triggers a presence broadcast whenever the registry changes.
//!
//! Cleanup runs when the [`ConnectionGuard`] returned by
//! [`ConnectionManager::connect`] is dropped, so an orderly close, a
//! transport error and an aborted task all take the same path.

use crate::broadcaster::PresenceBroadcaster;
use crate::connection::{
    ConnectionHandle, ConnectionId, ConnectionState, ConnectionTable, OutboundReceiver,
};
use crate::identity::{Handshake, Identity, UserId};
use crate::registry::PresenceRegistry;
use crate::router::{FanOut, Router};
use relay_protocol::{codes, ChatMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Gateway errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The connection limit is reached.
    #[error("Maximum connections reached ({0})")]
    CapacityReached(usize),

    /// The connection has no identity to send as.
    #[error("Anonymous connections cannot send messages")]
    Anonymous,

    /// The message names another user as its sender.
    #[error("Sender {claimed} does not match connection user {actual}")]
    SenderMismatch { claimed: String, actual: String },
}

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of simultaneous connections.
    pub max_connections: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
        }
    }
}

/// Gateway statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    /// Live connections, registered or anonymous.
    pub connections: usize,
    /// Users with at least one session.
    pub online_users: usize,
    /// Registered sessions.
    pub sessions: usize,
}

/// Owns live connections and their presence.
#[derive(Debug)]
pub struct ConnectionManager {
    registry: Arc<PresenceRegistry>,
    connections: Arc<ConnectionTable>,
    broadcaster: PresenceBroadcaster,
    router: Router,
    /// Connection slots taken, reserved before a connection is inserted.
    slots: AtomicUsize,
    config: ManagerConfig,
}

impl ConnectionManager {
    /// Create a manager with a fresh registry and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Create a manager with a fresh registry.
    #[must_use]
    pub fn with_config(config: ManagerConfig) -> Self {
        Self::with_registry(Arc::new(PresenceRegistry::new()), config)
    }

    /// Create a manager around an existing registry.
    #[must_use]
    pub fn with_registry(registry: Arc<PresenceRegistry>, config: ManagerConfig) -> Self {
        info!("Creating connection manager with config: {:?}", config);
        let connections = Arc::new(ConnectionTable::new());
        Self {
            broadcaster: PresenceBroadcaster::new(Arc::clone(&registry), Arc::clone(&connections)),
            router: Router::new(Arc::clone(&registry), Arc::clone(&connections)),
            registry,
            connections,
            slots: AtomicUsize::new(0),
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub fn broadcaster(&self) -> &PresenceBroadcaster {
        &self.broadcaster
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.connections.len(),
            online_users: self.registry.user_count(),
            sessions: self.registry.session_count(),
        }
    }

    /// State of a connection. Unknown connections count as closed.
    #[must_use]
    pub fn state(&self, connection_id: &ConnectionId) -> ConnectionState {
        self.connections
            .state(connection_id)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Accept a transport connection.
    ///
    /// A handshake with a user is registered and announced to everyone. If
    /// another connection held the same session it is told to close. A
    /// handshake without a user is accepted but only receives the current
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::CapacityReached`] when the connection limit is
    /// reached.
    pub fn connect(
        self: &Arc<Self>,
        handshake: &Handshake,
    ) -> Result<(ConnectionGuard, OutboundReceiver), GatewayError> {
        let max = self.config.max_connections;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < max).then_some(taken + 1)
            })
            .map_err(|_| GatewayError::CapacityReached(max))?;

        let id = ConnectionId::generate();
        let identity = handshake.identity();
        let (handle, rx) = ConnectionHandle::new(id.clone(), identity.clone());
        self.connections.insert(handle);

        match &identity {
            Some(identity) => {
                let superseded =
                    self.registry
                        .register(&identity.user_id, &identity.session_id, &id);
                if let Some(old) = superseded {
                    debug!(
                        connection = %old,
                        replacement = %id,
                        session = %identity,
                        "Closing superseded connection"
                    );
                    self.connections.close(
                        &old,
                        codes::SUPERSEDED,
                        "session taken over by another connection",
                    );
                }
                self.connections.set_state(&id, ConnectionState::Online);
                self.broadcaster.broadcast();
            }
            None => {
                self.connections.set_state(&id, ConnectionState::Online);
                self.broadcaster.send_current(&id);
            }
        }

        debug!(
            connection = %id,
            identity = ?identity,
            "Connection online"
        );

        let guard = ConnectionGuard {
            id,
            identity,
            manager: Arc::clone(self),
        };
        Ok((guard, rx))
    }

    /// Clean up a connection.
    ///
    /// Returns `true` if the presence registry changed. Unknown or already
    /// closed connections are ignored.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        self.connections
            .set_state(connection_id, ConnectionState::Closed);
        let Some(handle) = self.connections.remove(connection_id) else {
            return false;
        };
        self.slots.fetch_sub(1, Ordering::AcqRel);

        let changed = match handle.identity() {
            Some(identity) => self.registry.deregister_connection(
                &identity.user_id,
                &identity.session_id,
                connection_id,
            ),
            None => false,
        };

        if changed {
            self.broadcaster.broadcast();
        }

        debug!(connection = %connection_id, presence_changed = changed, "Connection closed");
        changed
    }

    /// Route a message sent over `identity`'s connection.
    ///
    /// # Errors
    ///
    /// Fails if there is no identity or the message names another sender.
    pub fn send_message(
        &self,
        identity: Option<&Identity>,
        message: ChatMessage,
    ) -> Result<FanOut, GatewayError> {
        let identity = identity.ok_or(GatewayError::Anonymous)?;
        if message.sender_id != identity.user_id.as_str() {
            return Err(GatewayError::SenderMismatch {
                claimed: message.sender_id,
                actual: identity.user_id.to_string(),
            });
        }

        let receiver = UserId::from(message.receiver_id.as_str());
        Ok(self.router.route(
            &identity.user_id,
            &receiver,
            &identity.session_id,
            message,
        ))
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// A live connection owned by its transport task.
///
/// Dropping the guard disconnects the connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    identity: Option<Identity>,
    manager: Arc<ConnectionManager>,
}

impl ConnectionGuard {
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.manager.state(&self.id)
    }

    /// Route a message sent by this connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::send_message`].
    pub fn send_message(&self, message: ChatMessage) -> Result<FanOut, GatewayError> {
        self.manager.send_message(self.identity.as_ref(), message)
    }

    /// Disconnect now instead of on drop.
    ///
    /// Returns `true` if the presence registry changed.
    pub fn close(self) -> bool {
        self.manager.disconnect(&self.id)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.disconnect(&self.id);
    }
}
