//! Postgres-backed repository implementations.

mod cache_store;
mod config;
mod jobs;
mod settings;
mod strings;
mod util;

pub use cache_store::PostgresCacheStore;
pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    /// apalis records its own migrations in the same ledger, so versions we
    /// do not know are ignored.
    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator.run(pool).await.map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

/// Postgres has no unsigned integers; counters are stored as BIGINT.
pub(crate) fn to_u64(value: i64, column: &str) -> Result<u64, crate::application::repos::RepoError> {
    u64::try_from(value).map_err(|_| {
        crate::application::repos::RepoError::from_persistence(format!(
            "negative value {value} in `{column}`"
        ))
    })
}

pub(crate) fn to_u32(value: i32, column: &str) -> Result<u32, crate::application::repos::RepoError> {
    u32::try_from(value).map_err(|_| {
        crate::application::repos::RepoError::from_persistence(format!(
            "negative value {value} in `{column}`"
        ))
    })
}
