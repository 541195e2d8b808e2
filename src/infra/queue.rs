//! apalis-backed job queues.
//!
//! Serving against a database pushes task ids into apalis' Postgres storage,
//! so any replica's workers can pick them up. Without a database the queue
//! is apalis' in-process memory storage.

use apalis::prelude::{MemoryStorage, MessageQueue, Storage};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::application::propagation::{JobQueue, PropagationTask, QueueError};

/// apalis namespace holding propagation tasks.
pub const PROPAGATION_NAMESPACE: &str = "namewright::propagation";

#[derive(Clone)]
pub struct MemoryJobQueue {
    storage: MemoryStorage<PropagationTask>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self {
            storage: MemoryStorage::new(),
        }
    }

    /// Storage handle for the worker side.
    pub fn storage(&self) -> MemoryStorage<PropagationTask> {
        self.storage.clone()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn offer(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut storage = self.storage.clone();
        storage
            .enqueue(PropagationTask { job_id })
            .await
            .map_err(|_| QueueError::Closed)
    }
}

#[derive(Clone)]
pub struct PostgresJobQueue {
    storage: PostgresStorage<PropagationTask>,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            storage: PostgresStorage::new_with_config(
                pool,
                ApalisSqlConfig::new(PROPAGATION_NAMESPACE),
            ),
        }
    }

    /// Create apalis' own schema next to ours.
    pub async fn setup(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut migrator = PostgresStorage::migrations();
        migrator.set_ignore_missing(true);
        migrator.run(pool).await.map_err(Into::into)
    }

    /// Storage handle for the worker side.
    pub fn storage(&self) -> PostgresStorage<PropagationTask> {
        self.storage.clone()
    }
}

#[async_trait]
impl JobQueue for PostgresJobQueue {
    async fn offer(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut storage = self.storage.clone();
        storage
            .push(PropagationTask { job_id })
            .await
            .map(|_| ())
            .map_err(|err| QueueError::Backend(err.to_string()))
    }
}
