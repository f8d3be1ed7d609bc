// Credential Store - keyed storage for the account's bearer token

use crate::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const TOKEN_KEY_PREFIX: &str = "TP_TOKEN_";

/// Bearer token authenticating settlement calls
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Account identifiers are phone numbers; whitespace is not significant
pub fn normalize_account(account: &str) -> String {
    account.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn token_key(account: &str) -> String {
    format!("{}{}", TOKEN_KEY_PREFIX, normalize_account(account))
}

/// External keyed store holding session tokens
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store the token for an account and make it the current account
    async fn set_token(&self, account: &str, token: SessionToken) -> Result<()>;

    /// Token for `account`, or for the current account when `None`
    async fn token(&self, account: Option<&str>) -> Result<Option<SessionToken>>;

    async fn current_account(&self) -> Result<Option<String>>;

    async fn set_current_account(&self, account: &str) -> Result<()>;

    async fn clear_token(&self, account: &str) -> Result<()>;

    /// Remove every token and forget the current account
    async fn wipe(&self) -> Result<()>;
}

/// Process-local `CredentialStore`
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    tokens: Arc<RwLock<HashMap<String, SessionToken>>>,
    current: Arc<RwLock<Option<String>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with one signed-in account
    pub async fn with_token(account: &str, token: impl Into<String>) -> Self {
        let store = Self::new();
        // Infallible for the in-memory store
        let _ = store.set_token(account, SessionToken::new(token)).await;
        store
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn set_token(&self, account: &str, token: SessionToken) -> Result<()> {
        let account = normalize_account(account);
        self.tokens.write().await.insert(token_key(&account), token);
        *self.current.write().await = Some(account);
        Ok(())
    }

    async fn token(&self, account: Option<&str>) -> Result<Option<SessionToken>> {
        let account = match account {
            Some(account) => normalize_account(account),
            None => match self.current.read().await.clone() {
                Some(current) => current,
                None => return Ok(None),
            },
        };

        if account.is_empty() {
            return Ok(None);
        }
        Ok(self.tokens.read().await.get(&token_key(&account)).cloned())
    }

    async fn current_account(&self) -> Result<Option<String>> {
        Ok(self.current.read().await.clone())
    }

    async fn set_current_account(&self, account: &str) -> Result<()> {
        *self.current.write().await = Some(normalize_account(account));
        Ok(())
    }

    async fn clear_token(&self, account: &str) -> Result<()> {
        self.tokens.write().await.remove(&token_key(account));
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        debug!("Wiping local credential store");
        self.tokens.write().await.clear();
        *self.current.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_key_strips_whitespace() {
        assert_eq!(token_key("+33 1 23 45 67 89"), "TP_TOKEN_+33123456789");
    }

    #[tokio::test]
    async fn test_current_account_used_by_default() {
        let store = InMemoryCredentialStore::new();
        assert!(store.token(None).await.unwrap().is_none());

        store
            .set_token("+33 6 00 00 00 01", SessionToken::new("tok-1"))
            .await
            .unwrap();

        assert_eq!(
            store.current_account().await.unwrap().as_deref(),
            Some("+33600000001")
        );
        assert_eq!(store.token(None).await.unwrap().unwrap().expose(), "tok-1");
        assert_eq!(
            store.token(Some("+33600000001")).await.unwrap().unwrap().expose(),
            "tok-1"
        );
    }

    #[tokio::test]
    async fn test_clear_and_wipe() {
        let store = InMemoryCredentialStore::with_token("+1 555 0100", "tok").await;
        store.set_token("+1 555 0199", SessionToken::new("other")).await.unwrap();

        store.clear_token("+1 555 0100").await.unwrap();
        assert!(store.token(Some("+15550100")).await.unwrap().is_none());
        assert!(store.token(None).await.unwrap().is_some());

        store.wipe().await.unwrap();
        assert!(store.token(None).await.unwrap().is_none());
        assert!(store.current_account().await.unwrap().is_none());
    }

    #[test]
    fn test_token_debug_redacted() {
        assert!(!format!("{:?}", SessionToken::new("secret-token")).contains("secret"));
    }
}
