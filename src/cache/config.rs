//! Cache configuration.
//!
//! Controls the catalog cache backend and entry lifetime via `namewright.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_TTL_SECONDS: u64 = 30 * 60;
const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

/// Which Cache Store implementation backs the catalog builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// In-process LRU map; suitable for single-instance and dev deployments.
    Memory,
    /// Shared Postgres table; required when several instances serve one dataset.
    Postgres,
}

/// Cache configuration from `namewright.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend used for catalog entries.
    pub backend: CacheBackend,
    /// Lifetime of a populated catalog entry, in seconds.
    pub ttl_seconds: u64,
    /// Maximum entries held by the memory backend.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Returns the memory capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn memory_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.memory_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
