//! User, session and handshake identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session label used when a client does not name its session.
pub const DEFAULT_SESSION: &str = "default";

/// Opaque account identifier, owned by the account store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One authenticated login context of a user.
///
/// A session ID is minted at login and never reused. An empty label is
/// normalized to [`DEFAULT_SESSION`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a session ID, mapping an empty label to the default session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.is_empty() {
            Self::default()
        } else {
            Self(id)
        }
    }

    /// Mint a fresh session ID for a new login.
    #[must_use]
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the shared default session label.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_SESSION
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self(DEFAULT_SESSION.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A resolved `(user, session)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub session_id: SessionId,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, session_id: impl Into<SessionId>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

/// Identity metadata carried by a transport handshake.
///
/// The handshake is trusted: whoever issued the credential behind it has
/// already authorized the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Connecting user, if any.
    pub user_id: Option<String>,
    /// Session label, if any.
    pub session_id: Option<String>,
}

impl Handshake {
    /// A handshake without identity.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A handshake for the given user and session.
    #[must_use]
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            session_id: Some(session_id.into()),
        }
    }

    /// Resolve the identity to register, if any.
    ///
    /// A missing or empty user ID yields `None`. A missing session ID yields
    /// the default session.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        let user_id = self.user_id.as_deref().filter(|u| !u.is_empty())?;
        let session_id = self
            .session_id
            .as_deref()
            .map(SessionId::new)
            .unwrap_or_default();
        Some(Identity {
            user_id: UserId::new(user_id),
            session_id,
        })
    }
}
