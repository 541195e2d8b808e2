//! Job execution state machine.
//!
//! A job is processed by whichever worker wins the atomic `pending → running`
//! claim. Targets are fixed when processing starts and then handled in
//! batches, one item at a time; every finished item bumps `processed_count`
//! immediately. Cancellation is honoured between items, whether it was
//! requested in this process or written to the store by another one.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::repos::{NewPropagationError, RepoError, Repositories};
use crate::domain::entities::{PropagationJobRecord, PropagationSettingsRecord};
use crate::domain::types::JobStatus;

use super::queue::CancellationRegistry;
use super::regenerate::{ItemFailure, Regeneration, StringRegenerator};
use super::targets::{descendants, resolve_targets};

pub(crate) const METRIC_ITEMS_PROCESSED: &str = "namewright_propagation_items_processed_total";
pub(crate) const METRIC_ITEMS_FAILED: &str = "namewright_propagation_items_failed_total";
pub(crate) const METRIC_ITEM_RETRIES: &str = "namewright_propagation_item_retries_total";
pub(crate) const METRIC_JOB_DURATION_MS: &str = "namewright_propagation_job_duration_ms";

pub struct JobRunner {
    repos: Arc<dyn Repositories>,
    regenerator: StringRegenerator,
    cancellations: Arc<CancellationRegistry>,
}

impl JobRunner {
    pub fn new(
        repos: Arc<dyn Repositories>,
        regenerator: StringRegenerator,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            repos,
            regenerator,
            cancellations,
        }
    }

    /// Claim and process one job. Returns `None` if another worker owns it or
    /// it is not ready to run.
    pub async fn run(&self, job_id: Uuid) -> Result<Option<JobStatus>, RepoError> {
        let Some(job) = self.repos.claim_job(job_id).await? else {
            debug!(job_id = %job_id, "Job not claimable; skipping");
            return Ok(None);
        };

        let flag = self.cancellations.register(job.id);
        let result = self.execute(&job, &flag).await;
        self.cancellations.remove(job.id);

        match result {
            Ok(status) => Ok(Some(status)),
            Err(err) => {
                error!(
                    job_id = %job.id,
                    job_type = job.job_type.as_str(),
                    error = %err,
                    "Propagation job aborted"
                );
                if let Err(finish_err) = self.repos.finish_job(job.id, JobStatus::Failed).await {
                    warn!(
                        job_id = %job.id,
                        error = %finish_err,
                        "Could not mark aborted job as failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        job: &PropagationJobRecord,
        flag: &AtomicBool,
    ) -> Result<JobStatus, RepoError> {
        let started = Instant::now();
        let settings = self.repos.load_settings(job.workspace_id).await?;
        let targets = match &job.target_string_ids {
            Some(ids) => ids.clone(),
            None => resolve_targets(&*self.repos, job.workspace_id, &job.source).await?,
        };
        self.repos.set_targets(job.id, &targets).await?;

        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            workspace_id = job.workspace_id,
            affected_strings = targets.len(),
            batch_size = settings.batch_size,
            "Propagation job started"
        );

        let target_set: HashSet<i64> = targets.iter().copied().collect();
        let mut finished: HashSet<i64> = HashSet::with_capacity(targets.len());
        let batch_size = settings.batch_size.max(1) as usize;
        let mut cancelled = false;

        'batches: for batch in targets.chunks(batch_size) {
            if self.cancel_requested(job.id, flag).await? {
                cancelled = true;
                break;
            }
            for &string_id in batch {
                if flag.load(Ordering::SeqCst) {
                    cancelled = true;
                    break 'batches;
                }
                if !finished.insert(string_id) {
                    continue;
                }

                let status = match self.process_item(job, string_id, &settings).await {
                    Ok(regeneration) => {
                        if let Regeneration::Updated {
                            old_value,
                            new_value,
                        } = &regeneration
                        {
                            debug!(
                                job_id = %job.id,
                                string_id,
                                old_value = %old_value,
                                new_value = %new_value,
                                "String regenerated"
                            );
                        }
                        counter!(METRIC_ITEMS_PROCESSED, "outcome" => "success").increment(1);
                        self.repos.record_progress(job.id, false).await?
                    }
                    Err(failure) => {
                        self.record_failure_with_subtree(
                            job,
                            string_id,
                            &failure,
                            &target_set,
                            &mut finished,
                        )
                        .await?
                    }
                };

                // Another process may have cancelled while the item was in flight.
                if status == JobStatus::Cancelled {
                    cancelled = true;
                    break 'batches;
                }
            }
        }

        let snapshot = self
            .repos
            .find_job(job.id)
            .await?
            .ok_or(RepoError::NotFound)?;

        if cancelled || snapshot.status == JobStatus::Cancelled {
            info!(
                job_id = %job.id,
                processed = snapshot.processed_count,
                affected_strings = snapshot.affected_strings_count,
                "Propagation job cancelled"
            );
            return Ok(JobStatus::Cancelled);
        }

        let status = snapshot.outcome();
        if !self.repos.finish_job(job.id, status).await? {
            // Cancelled between the last item and the status write.
            return Ok(JobStatus::Cancelled);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_JOB_DURATION_MS, "job_type" => job.job_type.as_str()).record(elapsed_ms);
        info!(
            job_id = %job.id,
            job_type = job.job_type.as_str(),
            status = status.as_str(),
            affected_strings = snapshot.affected_strings_count,
            processed = snapshot.processed_count,
            failed = snapshot.failed_count,
            elapsed_ms,
            "Propagation job finished"
        );
        Ok(status)
    }

    /// Regenerate one string, retrying transient failures within the
    /// workspace's retry budget.
    async fn process_item(
        &self,
        job: &PropagationJobRecord,
        string_id: i64,
        settings: &PropagationSettingsRecord,
    ) -> Result<Regeneration, ItemFailure> {
        let mut attempt: u32 = 0;
        loop {
            match self.regenerator.regenerate(string_id).await {
                Err(failure) if failure.is_transient() && attempt < settings.retry_attempts => {
                    attempt += 1;
                    counter!(METRIC_ITEM_RETRIES).increment(1);
                    debug!(
                        job_id = %job.id,
                        string_id,
                        attempt,
                        reason = %failure.message,
                        "Transient failure; retrying item"
                    );
                    let delay = u64::from(settings.retry_delay_seconds) * u64::from(attempt);
                    sleep(Duration::from_secs(delay)).await;
                }
                Err(mut failure) if failure.is_transient() => {
                    failure.message = format!(
                        "gave up after {} attempts: {}",
                        attempt + 1,
                        failure.message
                    );
                    return Err(failure);
                }
                other => return other,
            }
        }
    }

    /// Record a failed item; a configuration error also fails every target
    /// descending from it. Stops early once the job is seen cancelled.
    async fn record_failure_with_subtree(
        &self,
        job: &PropagationJobRecord,
        string_id: i64,
        failure: &ItemFailure,
        target_set: &HashSet<i64>,
        finished: &mut HashSet<i64>,
    ) -> Result<JobStatus, RepoError> {
        let mut status = self.record_failure(job, string_id, failure).await?;
        if !failure.aborts_subtree() {
            return Ok(status);
        }
        for descendant in descendants(&*self.repos, string_id).await? {
            if status == JobStatus::Cancelled {
                break;
            }
            if target_set.contains(&descendant) && finished.insert(descendant) {
                let skipped = ItemFailure::subtree_aborted(string_id, failure);
                status = self.record_failure(job, descendant, &skipped).await?;
            }
        }
        Ok(status)
    }

    async fn record_failure(
        &self,
        job: &PropagationJobRecord,
        string_id: i64,
        failure: &ItemFailure,
    ) -> Result<JobStatus, RepoError> {
        warn!(
            job_id = %job.id,
            string_id,
            error_type = failure.error_type.as_str(),
            message = %failure.message,
            "Propagation item failed"
        );
        self.repos
            .record_error(NewPropagationError {
                job_id: job.id,
                string_id,
                error_type: failure.error_type,
                message: failure.message.clone(),
                details: failure.details.clone(),
            })
            .await?;
        counter!(METRIC_ITEMS_PROCESSED, "outcome" => "failure").increment(1);
        counter!(METRIC_ITEMS_FAILED, "error_type" => failure.error_type.as_str()).increment(1);
        self.repos.record_progress(job.id, true).await
    }

    /// Local flag, or a cancellation written by another process.
    async fn cancel_requested(&self, job_id: Uuid, flag: &AtomicBool) -> Result<bool, RepoError> {
        if flag.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let status = self.repos.find_job(job_id).await?.map(|job| job.status);
        Ok(status == Some(JobStatus::Cancelled))
    }
}
