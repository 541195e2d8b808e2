//! Job queue seam and per-job cancellation flags.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
    #[error("job queue backend failure: {0}")]
    Backend(String),
}

/// Where approved jobs are offered for execution.
///
/// Only job ids travel through the queue; the job itself is always re-read
/// and claimed from the store, so offering the same id twice is harmless.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn offer(&self, job_id: Uuid) -> Result<(), QueueError>;
}

/// Cancellation flags for jobs currently being processed in this process.
#[derive(Default)]
pub struct CancellationRegistry {
    flags: DashMap<Uuid, Arc<AtomicBool>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job_id: Uuid) -> Arc<AtomicBool> {
        self.flags
            .entry(job_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Returns true if the job was running here.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.flags.get(&job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, job_id: Uuid) {
        self.flags.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_sets_registered_flag() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();
        assert!(!registry.cancel(job_id));

        let flag = registry.register(job_id);
        assert!(registry.cancel(job_id));
        assert!(flag.load(Ordering::SeqCst));

        registry.remove(job_id);
        assert!(!registry.cancel(job_id));
    }
}
