//! # relay-core
//!
//! Presence tracking and message fan-out for the Relay gateway.
//!
//! One user may be logged in from several browser contexts at once, each with
//! its own session and its own transport connection. This crate keeps track of
//! which sessions are connected and delivers messages and presence updates to
//! the right connections:
//!
//! - **Registry** - `user -> session -> connection` table of who is online
//! - **Lifecycle** - Connect/disconnect state machine, owns live connections
//! - **Router** - Fans a message out to the receiver and the sender's other sessions
//! - **Broadcaster** - Sends the full online-user snapshot on every change
//! - **Resolver** - Derives `(user, session)` from signed credential tokens
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│  Lifecycle  │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                        │       │               ▲
//!                        ▼       ▼               │
//!               ┌─────────────┐ ┌─────────────┐  │
//!               │ Broadcaster │ │   Router    │──┘
//!               └─────────────┘ └─────────────┘
//! ```

pub mod account;
pub mod broadcaster;
pub mod connection;
pub mod identity;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod token;

pub use account::{Account, AccountStore, InMemoryAccountStore, StoreError};
pub use broadcaster::{PresenceBroadcaster, PresenceSnapshot};
pub use connection::{ConnectionId, ConnectionState, Outbound, OutboundReceiver};
pub use identity::{Handshake, Identity, SessionId, UserId, DEFAULT_SESSION};
pub use lifecycle::{ConnectionGuard, ConnectionManager, GatewayError, GatewayStats, ManagerConfig};
pub use registry::PresenceRegistry;
pub use resolver::{Credentials, ResolveError, SessionResolver};
pub use router::{FanOut, Router};
pub use token::{Claims, TokenError, TokenIssuer};
