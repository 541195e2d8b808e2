//! Cache storage implementations.
//!
//! Catalog views are stored as opaque JSON under rendered `<kind>:<rule_id>`
//! keys. The store never interprets values; the catalog builders own the
//! shape of each entry.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use thiserror::Error;

use super::config::CacheConfig;
use super::lock::rw_write;

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
}

/// Key-value store holding derived catalog entries with a time-to-live.
///
/// Expired entries read as absent. Deleting an absent key is not an error.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Delete every listed key, returning how many were present.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError>;
}

struct Entry {
    value: Value,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// In-process LRU store.
///
/// A hit does not extend the entry's lifetime.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        rw_write(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        // LRU get needs mutable access to promote the entry.
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        rw_write(&self.entries, SOURCE, "set").put(key.to_string(), entry);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete_many");
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| entries.pop(key.as_str()))
            .filter(|entry| entry.is_live(now))
            .count();
        Ok(removed)
    }
}
