//! Catalog cache shared by every process pointed at the same database.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;

use crate::cache::{CacheError, CacheStore};

pub struct PostgresCacheStore {
    pool: PgPool,
}

impl PostgresCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop rows whose lifetime has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM catalog_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

fn backend(err: sqlx::Error) -> CacheError {
    CacheError::Backend(err.to_string())
}

#[async_trait]
impl CacheStore for PostgresCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        sqlx::query_scalar::<_, Value>(
            "SELECT value FROM catalog_cache WHERE key = $1 AND expires_at > now()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO catalog_cache (key, value, expires_at) \
             VALUES ($1, $2, now() + make_interval(secs => $3)) \
             ON CONFLICT (key) DO UPDATE SET \
                 value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let live = sqlx::query_scalar::<_, i64>(
            "WITH removed AS ( \
                 DELETE FROM catalog_cache WHERE key = ANY($1) RETURNING expires_at) \
             SELECT count(*) FROM removed WHERE expires_at > now()",
        )
        .bind(keys)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(usize::try_from(live).unwrap_or(0))
    }
}
