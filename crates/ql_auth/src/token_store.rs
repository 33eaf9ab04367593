//! Where access tokens live.
//!
//! Tokens are never written to the session document,
//! they're kept in a [`TokenStorage`] keyed by account id.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use crate::KeyringError;

/// Errors that can occur during token storage operations.
#[derive(Debug, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] KeyringError),
}

impl From<keyring::Error> for TokenStoreError {
    fn from(err: keyring::Error) -> Self {
        TokenStoreError::Keyring(KeyringError(err))
    }
}

#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// `Ok(None)` if no token was stored for `account_id`.
    async fn get(&self, account_id: &str) -> Result<Option<String>, TokenStoreError>;
    async fn put(&self, account_id: &str, token: &str) -> Result<(), TokenStoreError>;
    /// Deleting a missing token is not an error.
    async fn delete(&self, account_id: &str) -> Result<(), TokenStoreError>;
}

/// Tokens in the system keyring
/// (Secret Service, macOS Keychain, Windows Credential Manager).
pub struct KeyringTokenStorage {
    service: String,
}

impl KeyringTokenStorage {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account_id: &str) -> Result<keyring::Entry, TokenStoreError> {
        Ok(keyring::Entry::new(&self.service, account_id)?)
    }
}

#[async_trait]
impl TokenStorage for KeyringTokenStorage {
    async fn get(&self, account_id: &str) -> Result<Option<String>, TokenStoreError> {
        match self.entry(account_id)?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, account_id: &str, token: &str) -> Result<(), TokenStoreError> {
        self.entry(account_id)?.set_password(token)?;
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<(), TokenStoreError> {
        match self.entry(account_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Tokens in memory only, lost on exit.
/// For tests, and systems without a keyring.
#[derive(Default)]
pub struct MemoryTokenStorage {
    tokens: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn get(&self, account_id: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.tokens().get(account_id).cloned())
    }

    async fn put(&self, account_id: &str, token: &str) -> Result<(), TokenStoreError> {
        self.tokens()
            .insert(account_id.to_owned(), token.to_owned());
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<(), TokenStoreError> {
        self.tokens().remove(account_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage() {
        let store = MemoryTokenStorage::new();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.put("a", "token").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("token"));
        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
