use crate::error::{ApiError, Result as ApiResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use keyring::Entry;
use url::Url;

const APP_NAME: &str = "mailforge";
const TOKEN_KEY: &str = "access_token";

/// Where the bearer token lives between runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>>;
    async fn save(&self, token: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

pub struct RingStorage;

impl RingStorage {
    fn entry() -> Result<Entry> {
        Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
    }
}

#[async_trait]
impl TokenStore for RingStorage {
    async fn load(&self) -> Result<Option<String>> {
        match Self::entry()?.get_password() {
            Ok(token) if !token.is_empty() => Ok(Some(token)),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    async fn save(&self, token: &str) -> Result<()> {
        Self::entry()?
            .set_password(token)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
            .context("Failed to store access token")
    }

    async fn clear(&self) -> Result<()> {
        match Self::entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

/// Extract the bearer token from an OAuth callback URL such as
/// `http://localhost:5173/auth/callback?token=...`.
pub fn token_from_callback(callback: &str) -> ApiResult<String> {
    let missing = || ApiError::validation("No authentication token received");
    let url = Url::parse(callback.trim()).map_err(|_| missing())?;
    url.query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(missing)
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
    token: std::sync::Mutex<Option<String>>,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: std::sync::Mutex::new(Some(token.to_string())),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl TokenStore for MemoryStorage {
    async fn load(&self) -> Result<Option<String>> {
        Ok(self.current())
    }

    async fn save(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap() = Some(token.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self.token.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_callback() {
        let token =
            token_from_callback("http://localhost:5173/auth/callback?token=abc.def&x=1").unwrap();
        assert_eq!(token, "abc.def");
    }

    #[test]
    fn test_callback_without_token() {
        for input in [
            "http://localhost:5173/auth/callback",
            "http://localhost:5173/auth/callback?token=",
            "not a url",
        ] {
            let err = token_from_callback(input).unwrap_err();
            assert_eq!(err.to_string(), "No authentication token received");
        }
    }

    #[tokio::test]
    async fn test_memory_storage_round_trip() {
        let store = MemoryStorage::default();
        assert_eq!(store.load().await.unwrap(), None);
        store.save("t1").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("t1"));
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }
}
