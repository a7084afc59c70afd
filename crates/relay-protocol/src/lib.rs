//! # relay-protocol
//!
//! Wire protocol definitions for the Relay presence and message gateway.
//!
//! This crate defines the frames exchanged between Relay clients and the
//! gateway, their binary and JSON codecs, and protocol versioning.
//!
//! ## Frame Types
//!
//! - `Connected` - Handshake result with the registered identity
//! - `PresenceSnapshot` - Full list of online users
//! - `MessageSend` / `MessageDeliver` - Chat message fan-out
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, ChatMessage, Frame};
//!
//! let frame = Frame::message_send(ChatMessage::new("alice", "bob", "hi"));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, Encoding, ProtocolError};
pub use frames::{codes, ChatMessage, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
