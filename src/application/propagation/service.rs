//! Job submission, lifecycle commands and settings.

use std::sync::Arc;

use metrics::counter;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::repos::{JobQueryFilter, NewPropagationJob, Repositories};
use crate::domain::entities::{
    PropagationErrorRecord, PropagationJobRecord, PropagationSettingsRecord,
};
use crate::domain::types::{
    DataImpact, JobStatus, JobType, SourceReference, job_type_for_impact, source_for_impact,
};

use super::PropagationServiceError;
use super::queue::{CancellationRegistry, JobQueue};
use super::targets::{dedup_in_order, resolve_targets};

pub(crate) const METRIC_JOBS_CREATED: &str = "namewright_propagation_jobs_created_total";

const MAX_BATCH_SIZE: u32 = 1000;
const MAX_RETRY_ATTEMPTS: u32 = 10;
const MAX_RETRY_DELAY_SECONDS: u32 = 300;

#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub workspace_id: i64,
    pub job_type: JobType,
    pub source: SourceReference,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub auto_propagate: Option<bool>,
    pub require_approval: Option<bool>,
    pub notify_on_completion: Option<bool>,
    pub notify_on_failure: Option<bool>,
    pub batch_size: Option<u32>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u32>,
}

impl SettingsPatch {
    fn validate(&self) -> Result<(), PropagationServiceError> {
        if let Some(batch_size) = self.batch_size
            && !(1..=MAX_BATCH_SIZE).contains(&batch_size)
        {
            return Err(PropagationServiceError::invalid_settings(
                "batch_size",
                format!("must be between 1 and {MAX_BATCH_SIZE}"),
            ));
        }
        if let Some(attempts) = self.retry_attempts
            && attempts > MAX_RETRY_ATTEMPTS
        {
            return Err(PropagationServiceError::invalid_settings(
                "retry_attempts",
                format!("must be at most {MAX_RETRY_ATTEMPTS}"),
            ));
        }
        if let Some(delay) = self.retry_delay_seconds
            && delay > MAX_RETRY_DELAY_SECONDS
        {
            return Err(PropagationServiceError::invalid_settings(
                "retry_delay_seconds",
                format!("must be at most {MAX_RETRY_DELAY_SECONDS}"),
            ));
        }
        Ok(())
    }

    fn apply(self, settings: &mut PropagationSettingsRecord) {
        if let Some(value) = self.auto_propagate {
            settings.auto_propagate = value;
        }
        if let Some(value) = self.require_approval {
            settings.require_approval = value;
        }
        if let Some(value) = self.notify_on_completion {
            settings.notify_on_completion = value;
        }
        if let Some(value) = self.notify_on_failure {
            settings.notify_on_failure = value;
        }
        if let Some(value) = self.batch_size {
            settings.batch_size = value;
        }
        if let Some(value) = self.retry_attempts {
            settings.retry_attempts = value;
        }
        if let Some(value) = self.retry_delay_seconds {
            settings.retry_delay_seconds = value;
        }
    }
}

/// Front door of the propagation engine.
///
/// Creating a job never processes it inline; approved jobs are offered to the
/// job queue and anything the queue cannot take is picked up by the pending
/// sweeper.
#[derive(Clone)]
pub struct PropagationService {
    repos: Arc<dyn Repositories>,
    queue: Arc<dyn JobQueue>,
    cancellations: Arc<CancellationRegistry>,
}

impl PropagationService {
    pub fn new(
        repos: Arc<dyn Repositories>,
        queue: Arc<dyn JobQueue>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            repos,
            queue,
            cancellations,
        }
    }

    /// Explicit submission. Fails only on submission-time validation.
    pub async fn submit(
        &self,
        submission: JobSubmission,
    ) -> Result<PropagationJobRecord, PropagationServiceError> {
        self.validate_source(submission.workspace_id, submission.job_type, &submission.source)
            .await?;

        let target_string_ids = match &submission.source {
            SourceReference::Strings { string_ids } => Some(dedup_in_order(string_ids)),
            _ => None,
        };

        self.create(
            NewPropagationJob {
                workspace_id: submission.workspace_id,
                job_type: submission.job_type,
                source: submission.source,
                target_string_ids,
                metadata: submission.metadata,
                retry_of: None,
                approved: true,
            },
            "submit",
        )
        .await
    }

    /// Job for a data-impacting change, honouring the workspace settings.
    /// Returns `None` when auto propagation is off.
    pub async fn create_for_change(
        &self,
        workspace_id: i64,
        impact: &DataImpact,
        summary: &str,
    ) -> Result<Option<PropagationJobRecord>, PropagationServiceError> {
        let settings = self.repos.load_settings(workspace_id).await?;
        if !settings.auto_propagate {
            info!(
                workspace_id,
                job_type = job_type_for_impact(impact).as_str(),
                "Auto propagation disabled; change is invalidation-only"
            );
            return Ok(None);
        }

        let job = self
            .create(
                NewPropagationJob {
                    workspace_id,
                    job_type: job_type_for_impact(impact),
                    source: source_for_impact(impact),
                    target_string_ids: None,
                    metadata: json!({ "summary": summary, "impact": impact }),
                    retry_of: None,
                    approved: !settings.require_approval,
                },
                "change",
            )
            .await?;
        Ok(Some(job))
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<PropagationJobRecord, PropagationServiceError> {
        self.repos
            .find_job(job_id)
            .await?
            .ok_or(PropagationServiceError::JobNotFound { job_id })
    }

    pub async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
    ) -> Result<Vec<PropagationJobRecord>, PropagationServiceError> {
        Ok(self.repos.list_jobs(filter).await?)
    }

    pub async fn list_errors(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<PropagationErrorRecord>, PropagationServiceError> {
        self.get_job(job_id).await?;
        Ok(self.repos.list_errors(job_id).await?)
    }

    /// New job over the original's full target set, or over the strings with
    /// unresolved errors only. The original job is left untouched.
    pub async fn retry(
        &self,
        job_id: Uuid,
        retry_failed_only: bool,
    ) -> Result<PropagationJobRecord, PropagationServiceError> {
        let original = self.get_job(job_id).await?;
        if !original.status.is_terminal() {
            return Err(PropagationServiceError::InvalidTransition {
                job_id,
                status: original.status,
                action: "retry",
            });
        }

        let targets = if retry_failed_only {
            let failed: Vec<i64> = self
                .repos
                .list_errors(job_id)
                .await?
                .into_iter()
                .filter(|error| !error.is_resolved)
                .map(|error| error.string_id)
                .collect();
            dedup_in_order(&failed)
        } else {
            match &original.target_string_ids {
                Some(ids) => ids.clone(),
                None => {
                    resolve_targets(&*self.repos, original.workspace_id, &original.source).await?
                }
            }
        };

        self.create(
            NewPropagationJob {
                workspace_id: original.workspace_id,
                job_type: original.job_type,
                source: original.source.clone(),
                target_string_ids: Some(targets),
                metadata: json!({
                    "retry_of": original.id,
                    "retry_failed_only": retry_failed_only,
                    "original": original.metadata,
                }),
                retry_of: Some(original.id),
                approved: true,
            },
            "retry",
        )
        .await
    }

    pub async fn cancel(&self, job_id: Uuid) -> Result<PropagationJobRecord, PropagationServiceError> {
        let job = self.get_job(job_id).await?;
        if !self.repos.cancel_job(job_id).await? {
            return Err(PropagationServiceError::InvalidTransition {
                job_id,
                status: job.status,
                action: "cancel",
            });
        }
        let running_here = self.cancellations.cancel(job_id);
        info!(job_id = %job_id, previous_status = job.status.as_str(), running_here, "Propagation job cancelled");
        self.get_job(job_id).await
    }

    pub async fn approve(&self, job_id: Uuid) -> Result<PropagationJobRecord, PropagationServiceError> {
        let job = self.get_job(job_id).await?;
        if !self.repos.approve_job(job_id).await? {
            return Err(PropagationServiceError::InvalidTransition {
                job_id,
                status: job.status,
                action: "approve",
            });
        }
        info!(job_id = %job_id, "Propagation job approved");
        self.offer(job_id).await;
        self.get_job(job_id).await
    }

    /// Mark an error resolved. Returns false if it already was.
    pub async fn resolve_error(&self, error_id: Uuid) -> Result<bool, PropagationServiceError> {
        if self.repos.find_error(error_id).await?.is_none() {
            return Err(PropagationServiceError::ErrorNotFound { error_id });
        }
        Ok(self.repos.resolve_error(error_id).await?)
    }

    /// Offer up to `limit` approved pending jobs to the worker queue.
    pub async fn enqueue_pending(&self, limit: u32) -> Result<usize, PropagationServiceError> {
        let pending = self.repos.list_pending_jobs(limit).await?;
        let mut offered = 0;
        for job_id in pending {
            if self.offer(job_id).await {
                offered += 1;
            }
        }
        Ok(offered)
    }

    pub async fn settings(
        &self,
        workspace_id: i64,
    ) -> Result<PropagationSettingsRecord, PropagationServiceError> {
        Ok(self.repos.load_settings(workspace_id).await?)
    }

    pub async fn update_settings(
        &self,
        workspace_id: i64,
        patch: SettingsPatch,
    ) -> Result<PropagationSettingsRecord, PropagationServiceError> {
        patch.validate()?;
        let mut settings = self.repos.load_settings(workspace_id).await?;
        patch.apply(&mut settings);
        self.repos.save_settings(&settings).await?;
        info!(
            workspace_id,
            auto_propagate = settings.auto_propagate,
            require_approval = settings.require_approval,
            batch_size = settings.batch_size,
            retry_attempts = settings.retry_attempts,
            retry_delay_seconds = settings.retry_delay_seconds,
            "Propagation settings updated"
        );
        Ok(settings)
    }

    async fn create(
        &self,
        new_job: NewPropagationJob,
        origin: &'static str,
    ) -> Result<PropagationJobRecord, PropagationServiceError> {
        let job = self.repos.create_job(new_job).await?;
        counter!(METRIC_JOBS_CREATED, "job_type" => job.job_type.as_str(), "origin" => origin)
            .increment(1);
        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            workspace_id = job.workspace_id,
            approved = job.approved,
            retry_of = ?job.retry_of,
            origin,
            "Propagation job created"
        );

        // An explicitly empty target set has nothing to wait for.
        if job.target_string_ids.as_ref().is_some_and(Vec::is_empty) {
            if self.repos.claim_job(job.id).await?.is_some() {
                self.repos.finish_job(job.id, JobStatus::Completed).await?;
            }
            return self.get_job(job.id).await;
        }

        if job.approved {
            self.offer(job.id).await;
        }
        Ok(job)
    }

    /// A job the queue refuses stays pending for the sweeper.
    async fn offer(&self, job_id: Uuid) -> bool {
        match self.queue.offer(job_id).await {
            Ok(()) => true,
            Err(err) => {
                debug!(job_id = %job_id, reason = %err, "Job left for the pending sweeper");
                false
            }
        }
    }

    async fn validate_source(
        &self,
        workspace_id: i64,
        job_type: JobType,
        source: &SourceReference,
    ) -> Result<(), PropagationServiceError> {
        let expected = match source {
            SourceReference::DimensionValue { .. } => JobType::DimensionValueChange,
            SourceReference::ParentString { .. } => JobType::ParentStringChange,
            SourceReference::Rule { .. } => JobType::RulePatternChange,
            SourceReference::Strings { .. } => JobType::Manual,
        };
        if expected != job_type {
            return Err(PropagationServiceError::SourceMismatch { job_type });
        }

        match source {
            SourceReference::DimensionValue { dimension_value_id } => {
                let value = self
                    .repos
                    .find_dimension_value(*dimension_value_id)
                    .await?
                    .ok_or(PropagationServiceError::UnknownDimensionValue {
                        dimension_value_id: *dimension_value_id,
                    })?;
                ensure_workspace(workspace_id, value.workspace_id)
            }
            SourceReference::Rule { rule_id } => {
                let rule = self
                    .repos
                    .find_rule(*rule_id)
                    .await?
                    .ok_or(PropagationServiceError::UnknownRule { rule_id: *rule_id })?;
                ensure_workspace(workspace_id, rule.workspace_id)
            }
            SourceReference::ParentString { string_id } => {
                self.ensure_string(workspace_id, *string_id).await
            }
            SourceReference::Strings { string_ids } => {
                for string_id in string_ids {
                    self.ensure_string(workspace_id, *string_id).await?;
                }
                Ok(())
            }
        }
    }

    async fn ensure_string(
        &self,
        workspace_id: i64,
        string_id: i64,
    ) -> Result<(), PropagationServiceError> {
        let string = self
            .repos
            .find_string(string_id)
            .await?
            .ok_or(PropagationServiceError::UnknownString { string_id })?;
        ensure_workspace(workspace_id, string.workspace_id)
    }
}

fn ensure_workspace(expected: i64, found: i64) -> Result<(), PropagationServiceError> {
    if expected == found {
        Ok(())
    } else {
        Err(PropagationServiceError::WorkspaceMismatch { expected, found })
    }
}
