use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{CacheBackend, CacheError};

struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process backend; expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    map: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn full_key(group: &str, key: &str) -> String {
        format!("{}/{}", group, key)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, group: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let full_key = Self::full_key(group, key);
        let entry = match self.map.get(&full_key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.is_expired(Instant::now()) {
            drop(entry);
            self.map.remove(&full_key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn put(&self, group: &str, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.map.insert(
            Self::full_key(group, key),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn clear(&self, group: &str, key: &str) -> Result<(), CacheError> {
        self.map.remove(&Self::full_key(group, key));
        Ok(())
    }

    async fn clear_prefix(&self, group: &str, prefix: &str) -> Result<u64, CacheError> {
        let full_prefix = Self::full_key(group, prefix);
        let before = self.map.len();
        self.map.retain(|key, _| !key.starts_with(&full_prefix));
        Ok(before.saturating_sub(self.map.len()) as u64)
    }
}

/// Backend used when caching is disabled: every read misses.
pub struct NoopCache;

#[async_trait]
impl CacheBackend for NoopCache {
    async fn get(&self, _group: &str, _key: &str) -> Result<Option<Value>, CacheError> {
        Ok(None)
    }

    async fn put(&self, _group: &str, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self, _group: &str, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear_prefix(&self, _group: &str, _prefix: &str) -> Result<u64, CacheError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = MemoryCache::new();
        cache.put("g", "k", json!(1), Duration::from_millis(0)).await.unwrap();
        assert_eq!(cache.get("g", "k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_groups_are_separate_namespaces() {
        let cache = MemoryCache::new();
        cache.put("a", "k", json!("x"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("b", "k").await.unwrap(), None);
        assert_eq!(cache.get("a", "k").await.unwrap(), Some(json!("x")));
    }

    #[tokio::test]
    async fn test_clear_prefix_counts_removed() {
        let cache = MemoryCache::new();
        for key in ["Members/1/a", "Members/1/b", "Members/10/a"] {
            cache.put("g", key, json!(null), Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.clear_prefix("g", "Members/1/").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }
}
