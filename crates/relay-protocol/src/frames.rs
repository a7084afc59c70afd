//! Frame types for the Relay protocol.
//!
//! Frames are the fundamental unit of communication between a Relay client and
//! the gateway. Binary transports carry them as MessagePack, text transports as
//! JSON; both use the same `type` tag.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connected = 0x01,
    PresenceSnapshot = 0x02,
    MessageSend = 0x03,
    MessageDeliver = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connected),
            0x02 => Ok(FrameType::PresenceSnapshot),
            0x03 => Ok(FrameType::MessageSend),
            0x04 => Ok(FrameType::MessageDeliver),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// The frame could not be decoded.
    pub const MALFORMED_FRAME: u16 = 1001;
    /// The frame type is not accepted from clients.
    pub const UNEXPECTED_FRAME: u16 = 1002;
    /// The connection has no registered identity.
    pub const ANONYMOUS_CONNECTION: u16 = 1003;
    /// The message names a sender other than the connection's user.
    pub const SENDER_MISMATCH: u16 = 1004;
    /// The frame exceeds the configured size limit.
    pub const FRAME_TOO_LARGE: u16 = 1005;
    /// The gateway is at its connection limit.
    pub const CAPACITY_REACHED: u16 = 1006;
    /// Another connection took over this connection's session.
    pub const SUPERSEDED: u16 = 4001;
}

/// A chat message as exchanged between clients.
///
/// Only the routing fields are interpreted by the gateway. Everything else
/// (`_id`, `text`, `image`, `createdAt` and any field this type does not know
/// about) is kept as raw JSON and forwarded untouched, explicit `null`s
/// included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Sending user.
    pub sender_id: String,
    /// Receiving user.
    pub receiver_id: String,
    /// Fields not interpreted by the gateway.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    /// Create a text message.
    #[must_use]
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            extra: serde_json::Map::new(),
        }
        .with_field("text", text.into())
    }

    /// Attach an image URL.
    #[must_use]
    pub fn with_image(self, url: impl Into<serde_json::Value>) -> Self {
        self.with_field("image", url)
    }

    /// Set the creation timestamp, as the message store reports it.
    #[must_use]
    pub fn with_created_at(self, created_at: impl Into<serde_json::Value>) -> Self {
        self.with_field("createdAt", created_at)
    }

    /// Set a pass-through field.
    #[must_use]
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }

    /// A pass-through field, e.g. `_id` or `createdAt`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }

    /// The message text, if it is a string.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.field("text").and_then(serde_json::Value::as_str)
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Frame {
    /// Sent once after the transport handshake.
    #[serde(rename = "connected")]
    Connected {
        /// Transport-assigned connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// User this connection was registered for, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// Session this connection was registered for, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Full set of online users. Replaces the client's local view.
    #[serde(rename = "presence-snapshot")]
    PresenceSnapshot {
        /// Monotonic snapshot revision.
        revision: u64,
        /// Users with at least one open connection.
        user_ids: Vec<String>,
    },

    /// A client sends a message for fan-out.
    #[serde(rename = "message-send")]
    MessageSend {
        /// Optional request ID for acknowledgment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// The message.
        message: ChatMessage,
    },

    /// A message delivered to one of the recipient's or sender's sessions.
    #[serde(rename = "message-deliver")]
    MessageDeliver {
        /// The message.
        message: ChatMessage,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connected { .. } => FrameType::Connected,
            Frame::PresenceSnapshot { .. } => FrameType::PresenceSnapshot,
            Frame::MessageSend { .. } => FrameType::MessageSend,
            Frame::MessageDeliver { .. } => FrameType::MessageDeliver,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        version: u8,
        identity: Option<(String, String)>,
    ) -> Self {
        let (user_id, session_id) = match identity {
            Some((user, session)) => (Some(user), Some(session)),
            None => (None, None),
        };
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            user_id,
            session_id,
        }
    }

    /// Create a new PresenceSnapshot frame.
    #[must_use]
    pub fn presence_snapshot(revision: u64, user_ids: Vec<String>) -> Self {
        Frame::PresenceSnapshot { revision, user_ids }
    }

    /// Create a new MessageSend frame.
    #[must_use]
    pub fn message_send(message: ChatMessage) -> Self {
        Frame::MessageSend { id: None, message }
    }

    /// Create a new MessageSend frame with ID for acknowledgment.
    #[must_use]
    pub fn message_send_with_ack(id: u64, message: ChatMessage) -> Self {
        Frame::MessageSend {
            id: Some(id),
            message,
        }
    }

    /// Create a new MessageDeliver frame.
    #[must_use]
    pub fn message_deliver(message: ChatMessage) -> Self {
        Frame::MessageDeliver { message }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let send = Frame::message_send(ChatMessage::new("a", "b", "hi"));
        assert_eq!(send.frame_type(), FrameType::MessageSend);

        let snapshot = Frame::presence_snapshot(1, vec!["a".into()]);
        assert_eq!(snapshot.frame_type(), FrameType::PresenceSnapshot);
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x04), Ok(FrameType::MessageDeliver));
        assert_eq!(u8::from(FrameType::Pong), 0x08);
        assert!(FrameType::try_from(0x09).is_err());
    }

    #[test]
    fn test_chat_message_wire_names() {
        let message = ChatMessage::new("u1", "u2", "hello")
            .with_image("https://img.example/1.png")
            .with_created_at("2024-01-01T00:00:00Z");

        let value = serde_json::to_value(Frame::message_deliver(message)).unwrap();
        assert_eq!(value["type"], "message-deliver");
        assert_eq!(value["message"]["senderId"], "u1");
        assert_eq!(value["message"]["receiverId"], "u2");
        assert_eq!(value["message"]["createdAt"], "2024-01-01T00:00:00Z");
        assert!(value["message"].get("_id").is_none());
    }

    #[test]
    fn test_server_frames_use_camel_case() {
        let value =
            serde_json::to_value(Frame::connected("conn_1", 1, Some(("u1".into(), "s1".into()))))
                .unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["sessionId"], "s1");

        let value = serde_json::to_value(Frame::presence_snapshot(3, vec!["u1".into()])).unwrap();
        assert_eq!(value, json!({"type": "presence-snapshot", "revision": 3, "userIds": ["u1"]}));
    }

    #[test]
    fn test_untyped_fields_are_forwarded_verbatim() {
        let sent = r#"{"type":"message-send","message":{"senderId":"a","receiverId":"b","text":"hi","image":null,"createdAt":1700000000000}}"#;

        let Frame::MessageSend { message, .. } = crate::codec::decode_json(sent).unwrap() else {
            panic!("expected message-send");
        };
        assert_eq!(message.field("createdAt"), Some(&json!(1_700_000_000_000_u64)));

        let delivered = crate::codec::encode_json(&Frame::message_deliver(message)).unwrap();
        let delivered: serde_json::Value = serde_json::from_str(&delivered).unwrap();
        assert_eq!(
            delivered,
            json!({
                "type": "message-deliver",
                "message": {
                    "senderId": "a",
                    "receiverId": "b",
                    "text": "hi",
                    "image": null,
                    "createdAt": 1_700_000_000_000_u64
                }
            })
        );
    }

    #[test]
    fn test_image_only_message_gets_no_text() {
        let raw = json!({"senderId": "a", "receiverId": "b", "image": "x.png"});
        let message: ChatMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(message.text(), None);
        assert_eq!(serde_json::to_value(&message).unwrap(), raw);
    }

    #[test]
    fn test_chat_message_keeps_unknown_fields() {
        let raw = json!({
            "type": "message-send",
            "message": {
                "_id": "m1",
                "senderId": "u1",
                "receiverId": "u2",
                "text": "hey",
                "updatedAt": "2024-01-01T00:00:01Z"
            }
        });

        let frame: Frame = serde_json::from_value(raw).unwrap();
        let Frame::MessageSend { id, message } = frame else {
            panic!("expected message-send");
        };
        assert_eq!(id, None);
        assert_eq!(message.field("_id"), Some(&json!("m1")));
        assert_eq!(message.extra["updatedAt"], "2024-01-01T00:00:01Z");
    }

    #[test]
    fn test_connected_without_identity() {
        let value = serde_json::to_value(Frame::connected("conn_1", 1, None)).unwrap();
        assert_eq!(value["type"], "connected");
        assert!(value.get("userId").is_none());
        assert_eq!(value["connectionId"], "conn_1");
    }
}
