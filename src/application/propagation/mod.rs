//! Propagation job engine.
//!
//! Jobs move `pending → running → {completed | partial | failed}`, with
//! `cancelled` reachable from pending and running. [`PropagationService`]
//! creates and steers jobs and offers their ids to a [`JobQueue`];
//! [`JobRunner`] executes one job on behalf of the queue's workers.

mod queue;
mod regenerate;
mod runner;
mod service;
mod targets;
mod worker;

use thiserror::Error;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::types::{JobStatus, JobType};

pub use queue::{CancellationRegistry, JobQueue, QueueError};
pub use regenerate::{ItemFailure, Regeneration, StringRegenerator};
pub use runner::JobRunner;
pub use service::{JobSubmission, PropagationService, SettingsPatch};
pub use targets::{descendants, resolve_targets};
pub use worker::{
    PendingSweep, PendingSweepContext, PropagationTask, PropagationWorkerContext, SWEEP_BATCH,
    process_pending_sweep, process_propagation_task, sweep_pending,
};

pub(crate) use runner::{
    METRIC_ITEM_RETRIES, METRIC_ITEMS_FAILED, METRIC_ITEMS_PROCESSED, METRIC_JOB_DURATION_MS,
};
pub(crate) use service::METRIC_JOBS_CREATED;

#[derive(Debug, Error)]
pub enum PropagationServiceError {
    #[error("rule `{rule_id}` not found")]
    UnknownRule { rule_id: i64 },
    #[error("dimension value `{dimension_value_id}` not found")]
    UnknownDimensionValue { dimension_value_id: i64 },
    #[error("string `{string_id}` not found")]
    UnknownString { string_id: i64 },
    #[error("source belongs to workspace {found}, request targets workspace {expected}")]
    WorkspaceMismatch { expected: i64, found: i64 },
    #[error("source reference does not fit job type `{job_type}`")]
    SourceMismatch { job_type: JobType },
    #[error("job `{job_id}` not found")]
    JobNotFound { job_id: Uuid },
    #[error("error `{error_id}` not found")]
    ErrorNotFound { error_id: Uuid },
    #[error("cannot {action} job `{job_id}` in status `{status}`")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        action: &'static str,
    },
    #[error("invalid setting `{field}`: {reason}")]
    InvalidSettings { field: &'static str, reason: String },
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl PropagationServiceError {
    pub fn invalid_settings(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            field,
            reason: reason.into(),
        }
    }
}
