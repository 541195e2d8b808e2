//! Background job handlers driven by the apalis monitor.
//!
//! Queue payloads carry only a propagation job id. The handler claims and
//! runs the job through [`JobRunner`]; a job already claimed elsewhere, or no
//! longer pending, is skipped. The pending sweeper is a cron-driven worker
//! that re-offers approved pending jobs the queue never delivered.

use std::sync::Arc;

use apalis::prelude::{Data, Error as ApalisError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::PropagationServiceError;
use super::runner::JobRunner;
use super::service::PropagationService;

/// Upper bound on jobs offered per sweep.
pub const SWEEP_BATCH: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationTask {
    pub job_id: Uuid,
}

/// Shared context for propagation workers.
#[derive(Clone)]
pub struct PropagationWorkerContext {
    pub runner: Arc<JobRunner>,
}

pub async fn process_propagation_task(
    task: PropagationTask,
    context: Data<PropagationWorkerContext>,
) -> Result<(), ApalisError> {
    match context.runner.run(task.job_id).await {
        Ok(Some(status)) => {
            debug!(job_id = %task.job_id, status = status.as_str(), "Propagation task done");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            error!(job_id = %task.job_id, error = %err, "Propagation job failed to run");
            Err(job_failed(err))
        }
    }
}

/// Marker payload for each cron tick of the pending sweeper.
#[derive(Default, Debug, Clone)]
pub struct PendingSweep;

impl From<chrono::DateTime<chrono::Utc>> for PendingSweep {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct PendingSweepContext {
    pub propagation: PropagationService,
}

pub async fn process_pending_sweep(
    _tick: PendingSweep,
    context: Data<PendingSweepContext>,
) -> Result<(), ApalisError> {
    sweep_pending(&context.propagation)
        .await
        .map(|_| ())
        .map_err(job_failed)
}

/// Offer approved pending jobs to the queue. Also run once at startup.
pub async fn sweep_pending(propagation: &PropagationService) -> Result<usize, PropagationServiceError> {
    let offered = propagation.enqueue_pending(SWEEP_BATCH).await?;
    if offered > 0 {
        info!(offered, "Pending jobs offered to workers");
    }
    Ok(offered)
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_payload_is_only_the_job_id() {
        let job_id = Uuid::new_v4();
        let payload = serde_json::to_value(PropagationTask { job_id }).unwrap();
        assert_eq!(payload, serde_json::json!({ "job_id": job_id }));
    }

    #[test]
    fn failures_surface_as_failed_tasks() {
        let err = job_failed(PropagationServiceError::JobNotFound {
            job_id: Uuid::nil(),
        });
        assert!(matches!(err, ApalisError::Failed(_)));
    }
}
