//! Account store interface.
//!
//! Accounts live outside the gateway. The resolver only needs to know
//! whether a token's subject still exists.

use crate::identity::UserId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Account store unavailable: {0}")]
    Unavailable(String),
}

/// The parts of an account the gateway cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(default)]
    pub full_name: String,
}

impl Account {
    #[must_use]
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            full_name: String::new(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = name.into();
        self
    }
}

/// Lookup of accounts by ID.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Find an account. `Ok(None)` means it does not exist.
    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<Account>, StoreError>;
}

/// Account store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<UserId, Account>,
}

impl InMemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given accounts.
    #[must_use]
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert(account);
        }
        store
    }

    /// Add or replace an account.
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    /// Remove an account.
    pub fn remove(&self, user_id: &UserId) -> Option<Account> {
        self.accounts.remove(user_id).map(|(_, account)| account)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_id(&self, user_id: &UserId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(user_id).map(|a| a.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryAccountStore::with_accounts([Account::new("alice").with_name("Alice")]);

        let found = store.find_by_id(&"alice".into()).await.unwrap();
        assert_eq!(found.map(|a| a.full_name), Some("Alice".to_string()));
        assert!(store.find_by_id(&"bob".into()).await.unwrap().is_none());

        store.remove(&"alice".into());
        assert!(store.is_empty());
    }
}
