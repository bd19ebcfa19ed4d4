//! Session authentication with an explicitly scoped token cache

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::types::UserIdentity;

/// Validates bearer tokens for new sessions
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to a user; `None` for an anonymous session
    async fn validate(&self, token: Option<&str>) -> Result<Option<UserIdentity>>;
}

/// Calls the auth service's validate endpoint
pub struct HttpAuthenticator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthenticator {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn validate(&self, token: Option<&str>) -> Result<Option<UserIdentity>> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("missing bearer token".to_string()))?;

        let response = self
            .client
            .get(format!("{}/api/v1/auth/validate", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Unauthorized(format!("auth service unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Unauthorized(format!(
                "token rejected: HTTP {}",
                response.status()
            )));
        }

        let user: UserIdentity = response
            .json()
            .await
            .map_err(|e| Error::Unauthorized(format!("invalid auth response: {}", e)))?;
        if !user.is_active {
            return Err(Error::Unauthorized(format!("user {} is inactive", user.id)));
        }
        Ok(Some(user))
    }
}

/// Admits every session without an identity (auth disabled)
pub struct AnonymousAuthenticator;

#[async_trait]
impl Authenticator for AnonymousAuthenticator {
    async fn validate(&self, _token: Option<&str>) -> Result<Option<UserIdentity>> {
        Ok(None)
    }
}

struct CachedUser {
    user: UserIdentity,
    cached_at: Instant,
}

/// Time-expiring cache of validated tokens, keyed by SHA-256 digest
pub struct TokenCache {
    entries: RwLock<HashMap<String, CachedUser>>,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Get a cached identity if it has not expired
    pub fn get(&self, token: &str) -> Option<UserIdentity> {
        let key = Self::hash_token(token);
        let mut entries = self.entries.write();

        let expired = match entries.get(&key) {
            Some(entry) if entry.cached_at.elapsed() <= self.ttl => return Some(entry.user.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            tracing::debug!("Token cache miss (TTL expired): {}", &key[..12]);
            entries.remove(&key);
        }
        None
    }

    /// Cache a validated identity. Expired entries are evicted on every insert.
    pub fn put(&self, token: &str, user: UserIdentity) {
        let mut entries = self.entries.write();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.cached_at.elapsed() <= ttl);
        entries.insert(
            Self::hash_token(token),
            CachedUser {
                user,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at.elapsed() <= self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Any authenticator fronted by a token cache
pub struct CachedAuthenticator {
    inner: Arc<dyn Authenticator>,
    cache: Arc<TokenCache>,
}

impl CachedAuthenticator {
    pub fn new(inner: Arc<dyn Authenticator>, cache: Arc<TokenCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Authenticator for CachedAuthenticator {
    async fn validate(&self, token: Option<&str>) -> Result<Option<UserIdentity>> {
        if let Some(user) = token.and_then(|t| self.cache.get(t)) {
            return Ok(Some(user));
        }

        let user = self.inner.validate(token).await?;
        if let (Some(token), Some(user)) = (token, user.as_ref()) {
            self.cache.put(token, user.clone());
        }
        Ok(user)
    }
}
