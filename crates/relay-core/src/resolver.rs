//! Session identity resolution.
//!
//! Turns the credentials presented with a request into a `(user, session)`
//! pair. A browser can hold one token per login context; an optional session
//! discriminator picks among them.

use crate::account::{AccountStore, StoreError};
use crate::identity::{Identity, SessionId};
use crate::token::{TokenError, TokenIssuer};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No credential was presented.
    #[error("Unauthorized - no token provided")]
    Unauthenticated,

    /// The selected credential failed signature or expiry checks.
    #[error("Unauthorized - invalid token")]
    InvalidToken(#[source] TokenError),

    /// The token's subject is not a known account.
    #[error("User not found: {0}")]
    IdentitySubjectMissing(String),

    /// The account store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Credential material presented with one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Tokens in the order they were presented.
    pub tokens: Vec<String>,
    /// Out-of-band session discriminator, e.g. a `sessionId` query parameter.
    pub session_hint: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a token. Empty tokens (cleared cookies) are ignored.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        if !token.is_empty() {
            self.tokens.push(token);
        }
        self
    }

    /// Set the session discriminator. An empty hint counts as none.
    #[must_use]
    pub fn with_session_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        self.session_hint = (!hint.is_empty()).then_some(hint);
        self
    }
}

/// Resolves credentials against the token issuer and the account store.
#[derive(Clone)]
pub struct SessionResolver {
    issuer: TokenIssuer,
    accounts: Arc<dyn AccountStore>,
}

impl std::fmt::Debug for SessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionResolver")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl SessionResolver {
    #[must_use]
    pub fn new(issuer: TokenIssuer, accounts: Arc<dyn AccountStore>) -> Self {
        Self { issuer, accounts }
    }

    /// The issuer used to verify tokens.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Resolve credentials to an identity.
    ///
    /// With a session hint, the first token that verifies and carries that
    /// session wins. Otherwise the first presented token is used and must
    /// verify.
    ///
    /// # Errors
    ///
    /// See [`ResolveError`].
    pub async fn resolve(&self, credentials: &Credentials) -> Result<Identity, ResolveError> {
        let first = credentials
            .tokens
            .first()
            .ok_or(ResolveError::Unauthenticated)?;

        let hinted = credentials.session_hint.as_deref().and_then(|hint| {
            let hint = SessionId::new(hint);
            credentials
                .tokens
                .iter()
                .filter_map(|token| self.issuer.verify(token).ok())
                .find(|claims| claims.identity().session_id == hint)
        });

        let claims = match hinted {
            Some(claims) => claims,
            None => self
                .issuer
                .verify(first)
                .map_err(ResolveError::InvalidToken)?,
        };

        let identity = claims.identity();
        if self.accounts.find_by_id(&identity.user_id).await?.is_none() {
            return Err(ResolveError::IdentitySubjectMissing(
                identity.user_id.to_string(),
            ));
        }

        debug!(
            user = %identity.user_id,
            session = %identity.session_id,
            "Resolved session identity"
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, InMemoryAccountStore};
    use crate::identity::UserId;

    fn resolver() -> SessionResolver {
        let accounts = InMemoryAccountStore::with_accounts([
            Account::new("alice"),
            Account::new("bob"),
        ]);
        SessionResolver::new(TokenIssuer::new(b"secret"), Arc::new(accounts))
    }

    fn token(resolver: &SessionResolver, user: &str, session: Option<&str>) -> String {
        let session = session.map(SessionId::from);
        resolver
            .issuer()
            .issue(&UserId::from(user), session.as_ref())
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve(&Credentials::new()).await,
            Err(ResolveError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_hint_selects_matching_session() {
        let resolver = resolver();
        let creds = Credentials::new()
            .with_token(token(&resolver, "alice", Some("tab-1")))
            .with_token(token(&resolver, "bob", Some("tab-2")))
            .with_session_hint("tab-2");

        let identity = resolver.resolve(&creds).await.unwrap();
        assert_eq!(identity, Identity::new("bob", "tab-2"));
    }

    #[tokio::test]
    async fn test_unmatched_hint_falls_back_to_first_token() {
        let resolver = resolver();
        let creds = Credentials::new()
            .with_token(token(&resolver, "alice", Some("tab-1")))
            .with_token(token(&resolver, "bob", Some("tab-2")))
            .with_session_hint("tab-9");

        let identity = resolver.resolve(&creds).await.unwrap();
        assert_eq!(identity, Identity::new("alice", "tab-1"));
    }

    #[tokio::test]
    async fn test_token_without_session_uses_default() {
        let resolver = resolver();
        let creds = Credentials::new().with_token(token(&resolver, "alice", None));

        let identity = resolver.resolve(&creds).await.unwrap();
        assert!(identity.session_id.is_default());
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let resolver = resolver();
        let forged = TokenIssuer::new(b"other")
            .issue(&"alice".into(), None)
            .unwrap();
        let creds = Credentials::new().with_token(forged);

        assert!(matches!(
            resolver.resolve(&creds).await,
            Err(ResolveError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_hint_skips_invalid_tokens() {
        let resolver = resolver();
        let creds = Credentials::new()
            .with_token("garbage")
            .with_token(token(&resolver, "alice", Some("tab-1")))
            .with_session_hint("tab-1");

        let identity = resolver.resolve(&creds).await.unwrap();
        assert_eq!(identity, Identity::new("alice", "tab-1"));
    }

    #[tokio::test]
    async fn test_unknown_subject() {
        let resolver = resolver();
        let creds = Credentials::new().with_token(token(&resolver, "mallory", Some("s")));

        match resolver.resolve(&creds).await {
            Err(ResolveError::IdentitySubjectMissing(user)) => assert_eq!(user, "mallory"),
            other => panic!("expected IdentitySubjectMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_inputs_ignored() {
        let creds = Credentials::new().with_token("").with_session_hint("");
        assert!(creds.tokens.is_empty());
        assert!(creds.session_hint.is_none());
    }
}
