//! Message fan-out router.
//!
//! A sent message goes to every session of the recipient and to every
//! session of the sender except the one it was sent from. Offline or unknown
//! recipients simply receive nothing.

use crate::connection::{ConnectionId, ConnectionTable};
use crate::identity::{SessionId, UserId};
use crate::registry::PresenceRegistry;
use relay_protocol::{ChatMessage, Frame};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of routing one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections of the recipient that accepted the message.
    pub to_receiver: usize,
    /// Other connections of the sender that accepted the message.
    pub to_sender: usize,
}

impl FanOut {
    /// Total number of deliveries.
    #[must_use]
    pub fn total(&self) -> usize {
        self.to_receiver + self.to_sender
    }
}

/// Routes messages to the connections registered for their users.
#[derive(Debug)]
pub struct Router {
    registry: Arc<PresenceRegistry>,
    connections: Arc<ConnectionTable>,
}

impl Router {
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>, connections: Arc<ConnectionTable>) -> Self {
        Self {
            registry,
            connections,
        }
    }

    /// Deliver `message` to the receiver's sessions and the sender's other
    /// sessions.
    ///
    /// The origin session never gets its own message back, also when a user
    /// writes to themselves. Each connection receives the message at most once.
    pub fn route(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
        origin_session: &SessionId,
        message: ChatMessage,
    ) -> FanOut {
        let frame = Arc::new(Frame::message_deliver(message));
        let mut reached: HashSet<ConnectionId> = HashSet::new();
        let mut fan_out = FanOut::default();

        for (session_id, connection_id) in self.registry.sessions_of(receiver_id) {
            if receiver_id == sender_id && &session_id == origin_session {
                continue;
            }
            if self.deliver(&connection_id, &frame, &mut reached) {
                fan_out.to_receiver += 1;
            }
        }

        for (session_id, connection_id) in self.registry.sessions_of(sender_id) {
            if &session_id == origin_session {
                continue;
            }
            if self.deliver(&connection_id, &frame, &mut reached) {
                fan_out.to_sender += 1;
            }
        }

        debug!(
            sender = %sender_id,
            receiver = %receiver_id,
            session = %origin_session,
            to_receiver = fan_out.to_receiver,
            to_sender = fan_out.to_sender,
            "Routed message"
        );

        fan_out
    }

    fn deliver(
        &self,
        connection_id: &ConnectionId,
        frame: &Arc<Frame>,
        reached: &mut HashSet<ConnectionId>,
    ) -> bool {
        if !reached.insert(connection_id.clone()) {
            return false;
        }
        let delivered = self.connections.deliver(connection_id, Arc::clone(frame));
        if !delivered {
            trace!(connection = %connection_id, "Dropped delivery to closed connection");
        }
        delivered
    }
}
