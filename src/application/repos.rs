//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entities::{
    DimensionRecord, DimensionValueRecord, FieldRecord, PlatformRecord, PropagationErrorRecord,
    PropagationJobRecord, PropagationSettingsRecord, RuleRecord, StringDetailRecord, StringRecord,
};
use crate::domain::types::{JobStatus, JobType, PropagationErrorType, SourceReference};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("concurrent modification: {message}")]
    Conflict { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Lock contention and timeouts clear up on their own; everything else needs a human.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Conflict { .. } | RepoError::Timeout)
    }
}

/// Read access to the naming configuration: rules, dimensions, fields, platforms.
///
/// Every listing that can cross tenants takes the workspace explicitly.
#[async_trait]
pub trait ConfigRepo: Send + Sync {
    async fn find_rule(&self, rule_id: i64) -> Result<Option<RuleRecord>, RepoError>;

    async fn list_rule_ids_by_dimension(
        &self,
        workspace_id: i64,
        dimension_id: i64,
    ) -> Result<Vec<i64>, RepoError>;

    async fn list_rule_ids_by_field(
        &self,
        workspace_id: i64,
        field_id: i64,
    ) -> Result<Vec<i64>, RepoError>;

    async fn list_rule_ids_by_platform(
        &self,
        workspace_id: i64,
        platform_id: i64,
    ) -> Result<Vec<i64>, RepoError>;

    async fn find_dimension_value(
        &self,
        dimension_value_id: i64,
    ) -> Result<Option<DimensionValueRecord>, RepoError>;

    async fn list_dimensions(
        &self,
        workspace_id: i64,
        dimension_ids: &[i64],
    ) -> Result<Vec<DimensionRecord>, RepoError>;

    async fn list_dimension_values(
        &self,
        workspace_id: i64,
        dimension_ids: &[i64],
    ) -> Result<Vec<DimensionValueRecord>, RepoError>;

    async fn list_fields(&self, field_ids: &[i64]) -> Result<Vec<FieldRecord>, RepoError>;

    async fn find_platform(&self, platform_id: i64) -> Result<Option<PlatformRecord>, RepoError>;
}

#[async_trait]
pub trait StringsRepo: Send + Sync {
    async fn find_string(&self, string_id: i64) -> Result<Option<StringRecord>, RepoError>;

    /// Details of one string ordered by `order`.
    async fn list_details(&self, string_id: i64) -> Result<Vec<StringDetailRecord>, RepoError>;

    async fn list_string_ids_by_dimension_value(
        &self,
        workspace_id: i64,
        dimension_value_id: i64,
    ) -> Result<Vec<i64>, RepoError>;

    async fn list_string_ids_by_rule(
        &self,
        workspace_id: i64,
        rule_id: i64,
    ) -> Result<Vec<i64>, RepoError>;

    /// Direct children only.
    async fn list_children(&self, string_id: i64) -> Result<Vec<i64>, RepoError>;

    async fn find_by_value(
        &self,
        workspace_id: i64,
        rule_id: i64,
        field_id: i64,
        value: &str,
    ) -> Result<Option<i64>, RepoError>;

    /// Compare-and-set write. Fails with [`RepoError::Conflict`] when the stored
    /// version no longer matches `expected_version`.
    async fn update_string_value(
        &self,
        string_id: i64,
        expected_version: i64,
        value: &str,
    ) -> Result<StringRecord, RepoError>;
}

#[derive(Debug, Clone)]
pub struct NewPropagationJob {
    pub workspace_id: i64,
    pub job_type: JobType,
    pub source: SourceReference,
    /// Fixed target set for retries; resolved from `source` otherwise.
    pub target_string_ids: Option<Vec<i64>>,
    pub metadata: serde_json::Value,
    pub retry_of: Option<Uuid>,
    pub approved: bool,
}

#[derive(Debug, Clone)]
pub struct NewPropagationError {
    pub job_id: Uuid,
    pub string_id: i64,
    pub error_type: PropagationErrorType,
    pub message: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct JobQueryFilter {
    pub workspace_id: Option<i64>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<u32>,
}

/// Durable job and per-item error store.
#[async_trait]
pub trait PropagationRepo: Send + Sync {
    async fn create_job(&self, job: NewPropagationJob) -> Result<PropagationJobRecord, RepoError>;

    async fn find_job(&self, job_id: Uuid) -> Result<Option<PropagationJobRecord>, RepoError>;

    /// Newest first.
    async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
    ) -> Result<Vec<PropagationJobRecord>, RepoError>;

    /// Approved pending jobs, oldest first.
    async fn list_pending_jobs(&self, limit: u32) -> Result<Vec<Uuid>, RepoError>;

    /// Atomically move an approved job from `pending` to `running`.
    ///
    /// Returns `None` when the job is missing, unapproved or already claimed.
    async fn claim_job(&self, job_id: Uuid) -> Result<Option<PropagationJobRecord>, RepoError>;

    /// Persist the resolved target set and fix `affected_strings_count`.
    async fn set_targets(&self, job_id: Uuid, string_ids: &[i64]) -> Result<(), RepoError>;

    /// Count one finished item and report the job's status after the write,
    /// so a runner notices cancellations made elsewhere.
    async fn record_progress(&self, job_id: Uuid, failed: bool) -> Result<JobStatus, RepoError>;

    /// Move a running job to its terminal status. Returns false if the job is no
    /// longer running (for instance cancelled meanwhile).
    async fn finish_job(&self, job_id: Uuid, status: JobStatus) -> Result<bool, RepoError>;

    /// Move a pending or running job to `cancelled`. Returns false for terminal jobs.
    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, RepoError>;

    /// Mark a pending job approved. Returns false if it was not awaiting approval.
    async fn approve_job(&self, job_id: Uuid) -> Result<bool, RepoError>;

    async fn record_error(
        &self,
        error: NewPropagationError,
    ) -> Result<PropagationErrorRecord, RepoError>;

    async fn list_errors(&self, job_id: Uuid) -> Result<Vec<PropagationErrorRecord>, RepoError>;

    async fn find_error(
        &self,
        error_id: Uuid,
    ) -> Result<Option<PropagationErrorRecord>, RepoError>;

    /// Returns false when the error was already resolved.
    async fn resolve_error(&self, error_id: Uuid) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait SettingsRepo: Send + Sync {
    /// Stored settings, or the defaults when the workspace has none yet.
    async fn load_settings(&self, workspace_id: i64)
    -> Result<PropagationSettingsRecord, RepoError>;

    async fn save_settings(&self, settings: &PropagationSettingsRecord) -> Result<(), RepoError>;
}

/// Everything the engine needs from persistence, behind one handle.
pub trait Repositories:
    ConfigRepo + StringsRepo + PropagationRepo + SettingsRepo + Send + Sync
{
}

impl<T> Repositories for T where
    T: ConfigRepo + StringsRepo + PropagationRepo + SettingsRepo + Send + Sync
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RepoError::Timeout.is_transient());
        assert!(
            RepoError::Conflict {
                message: "version moved".into()
            }
            .is_transient()
        );
        assert!(
            !RepoError::Duplicate {
                constraint: "strings_unique_value".into()
            }
            .is_transient()
        );
        assert!(!RepoError::NotFound.is_transient());
    }
}
