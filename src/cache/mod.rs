//! Read-through cache for member data.
//!
//! Backends store JSON values under `(group, key)` with a TTL. A stored JSON
//! `null` is a hit (the row is known to be absent), distinct from a miss.
//! [`UserCache`] never fails the caller: backend errors are logged and the
//! operation continues against the database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::{CacheConfig, MAX_CACHE_TTL_SECS},
    domain::Realm,
    error::{AppError, Result},
};

pub mod memory;

pub use memory::{MemoryCache, NoopCache};

/// Namespace of every member-related entry.
pub const CACHE_GROUP: &str = "db/sys/mod/user";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("Cached value could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::CacheUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, group: &str, key: &str) -> std::result::Result<Option<Value>, CacheError>;
    async fn put(&self, group: &str, key: &str, value: Value, ttl: Duration) -> std::result::Result<(), CacheError>;
    async fn clear(&self, group: &str, key: &str) -> std::result::Result<(), CacheError>;
    /// Returns the number of removed entries.
    async fn clear_prefix(&self, group: &str, prefix: &str) -> std::result::Result<u64, CacheError>;
}

/// Key layout: entries owned by one member share `"{realm}/{id}/"`.
pub mod keys {
    use super::Realm;

    pub fn member_prefix(realm: Realm, profile_id: i64) -> String {
        format!("{}/{}/", realm.table(), profile_id)
    }

    pub fn member(realm: Realm, profile_id: i64, name: &str) -> String {
        format!("{}{}", member_prefix(realm, profile_id), name)
    }

    pub fn id_by_email(realm: Realm, email: &str) -> String {
        format!("id/{}/email/{}", realm.table(), email.to_lowercase())
    }

    pub fn id_by_username(realm: Realm, username: &str) -> String {
        format!("id/{}/username/{}", realm.table(), username)
    }

    pub fn sex_by_username(realm: Realm, username: &str) -> String {
        format!("sex/{}/username/{}", realm.table(), username)
    }

    pub fn memberships(group_id: Option<i64>) -> String {
        match group_id {
            Some(id) => format!("memberships/{}", id),
            None => "memberships/all".to_string(),
        }
    }

    pub fn permissions(group_id: i64) -> String {
        format!("permissions/{}", group_id)
    }
}

/// A pending read-through lookup bound to one key.
pub struct CacheEntry<'a> {
    cache: &'a UserCache,
    key: String,
    ttl: Duration,
}

impl CacheEntry<'_> {
    pub async fn get<T: DeserializeOwned>(&self) -> Option<T> {
        self.cache.get(&self.key).await
    }

    pub async fn put<T: Serialize>(&self, value: &T) {
        self.cache.put_with_ttl(&self.key, value, self.ttl).await
    }
}

#[derive(Clone)]
pub struct UserCache {
    backend: Arc<dyn CacheBackend>,
    group: &'static str,
    ttl: Duration,
}

impl UserCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            group: CACHE_GROUP,
            ttl: ttl.min(Duration::from_secs(MAX_CACHE_TTL_SECS)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let backend: Arc<dyn CacheBackend> = if config.enabled {
            Arc::new(MemoryCache::new())
        } else {
            Arc::new(NoopCache)
        };
        Self::new(backend, config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn start(&self, key: impl Into<String>, ttl: Duration) -> CacheEntry<'_> {
        CacheEntry {
            cache: self,
            key: key.into(),
            ttl: ttl.min(Duration::from_secs(MAX_CACHE_TTL_SECS)),
        }
    }

    /// `None` on a miss, on a backend failure, or on an undecodable entry.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.backend.get(self.group, key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!("cache miss {}", key);
                return None;
            }
            Err(e) => {
                tracing::warn!("Cache get failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(decoded) => {
                tracing::debug!("cache hit {}", key);
                Some(decoded)
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.clear(key).await;
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &str, value: &T) {
        self.put_with_ttl(key, value, self.ttl).await
    }

    async fn put_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Not caching {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.backend.put(self.group, key, value, ttl).await {
            tracing::warn!("Cache put failed for {}: {}", key, e);
        }
    }

    pub async fn clear(&self, key: &str) {
        if let Err(e) = self.backend.clear(self.group, key).await {
            tracing::warn!("Cache clear failed for {}: {}", key, e);
        }
    }

    pub async fn clear_prefix(&self, prefix: &str) {
        match self.backend.clear_prefix(self.group, prefix).await {
            Ok(removed) => tracing::debug!("cleared {} cache entries under {}", removed, prefix),
            Err(e) => tracing::warn!("Cache prefix clear failed for {}: {}", prefix, e),
        }
    }

    /// Drops every entry owned by one member.
    pub async fn clear_member(&self, realm: Realm, profile_id: i64) {
        self.clear_prefix(&keys::member_prefix(realm, profile_id)).await
    }

    /// Returns the cached value, or runs `load` and caches what it returns.
    /// Errors from `load` are returned and never cached.
    pub async fn remember<T, F, Fut>(&self, key: &str, load: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let entry = self.start(key, self.ttl);
        if let Some(value) = entry.get::<T>().await {
            return Ok(value);
        }
        let value = load().await?;
        entry.put(&value).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_is_a_hit_not_a_miss() {
        let cache = UserCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        assert_eq!(cache.get::<Option<String>>("k").await, None);
        cache.put("k", &Option::<String>::None).await;
        assert_eq!(cache.get::<Option<String>>("k").await, Some(None));
    }

    #[tokio::test]
    async fn test_remember_loads_once() {
        let cache = UserCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        let first: i64 = cache.remember("n", || async { Ok(7) }).await.unwrap();
        let second: i64 = cache
            .remember("n", || async { Err(AppError::Internal("loader must not run".to_string())) })
            .await
            .unwrap();
        assert_eq!(first, 7);
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_remember_does_not_cache_errors() {
        let cache = UserCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));

        let failed: Result<i64> = cache
            .remember("e", || async { Err(AppError::NotFound("row".to_string())) })
            .await;
        assert!(failed.is_err());
        assert_eq!(cache.get::<i64>("e").await, None);
    }

    #[tokio::test]
    async fn test_clear_member_only_touches_that_member() {
        let cache = UserCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        cache.put(&keys::member(Realm::Members, 1, "readProfile"), &1).await;
        cache.put(&keys::member(Realm::Members, 12, "readProfile"), &12).await;

        cache.clear_member(Realm::Members, 1).await;

        assert_eq!(cache.get::<i64>(&keys::member(Realm::Members, 1, "readProfile")).await, None);
        assert_eq!(cache.get::<i64>(&keys::member(Realm::Members, 12, "readProfile")).await, Some(12));
    }

    #[test]
    fn test_ttl_is_capped() {
        let cache = UserCache::new(Arc::new(NoopCache), Duration::from_secs(10 * MAX_CACHE_TTL_SECS));
        assert_eq!(cache.ttl(), Duration::from_secs(MAX_CACHE_TTL_SECS));
    }
}
