use std::convert::TryFrom;

use async_trait::async_trait;
use sqlx::QueryBuilder;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{
        JobQueryFilter, NewPropagationError, NewPropagationJob, PropagationRepo, RepoError,
    },
    domain::{
        entities::{PropagationErrorRecord, PropagationJobRecord},
        types::{JobStatus, JobType, PropagationErrorType, SourceReference},
    },
};

use super::{PostgresRepositories, map_sqlx_error, to_u64};

const JOB_COLUMNS: &str = "id, workspace_id, job_type, status, source, target_string_ids, \
    affected_strings_count, processed_count, failed_count, metadata, retry_of, approved, \
    created_at, started_at, completed_at";

const ERROR_COLUMNS: &str =
    "id, job_id, string_id, error_type, message, details, is_resolved, created_at, resolved_at";

const MAX_LIST_LIMIT: u32 = 500;

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    workspace_id: i64,
    job_type: String,
    status: String,
    source: serde_json::Value,
    target_string_ids: Option<Vec<i64>>,
    affected_strings_count: i64,
    processed_count: i64,
    failed_count: i64,
    metadata: serde_json::Value,
    retry_of: Option<Uuid>,
    approved: bool,
    created_at: OffsetDateTime,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<JobRow> for PropagationJobRecord {
    type Error = RepoError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = row
            .job_type
            .parse::<JobType>()
            .map_err(RepoError::from_persistence)?;
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(RepoError::from_persistence)?;
        let source: SourceReference = serde_json::from_value(row.source).map_err(|err| {
            RepoError::from_persistence(format!("malformed source on job `{}`: {err}", row.id))
        })?;

        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            job_type,
            status,
            source,
            target_string_ids: row.target_string_ids,
            affected_strings_count: to_u64(row.affected_strings_count, "affected_strings_count")?,
            processed_count: to_u64(row.processed_count, "processed_count")?,
            failed_count: to_u64(row.failed_count, "failed_count")?,
            metadata: row.metadata,
            retry_of: row.retry_of,
            approved: row.approved,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ErrorRow {
    id: Uuid,
    job_id: Uuid,
    string_id: i64,
    error_type: String,
    message: String,
    details: serde_json::Value,
    is_resolved: bool,
    created_at: OffsetDateTime,
    resolved_at: Option<OffsetDateTime>,
}

impl TryFrom<ErrorRow> for PropagationErrorRecord {
    type Error = RepoError;

    fn try_from(row: ErrorRow) -> Result<Self, Self::Error> {
        let error_type = row
            .error_type
            .parse::<PropagationErrorType>()
            .map_err(RepoError::from_persistence)?;

        Ok(Self {
            id: row.id,
            job_id: row.job_id,
            string_id: row.string_id,
            error_type,
            message: row.message,
            details: row.details,
            is_resolved: row.is_resolved,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

impl PostgresRepositories {
    async fn job_exists(&self, job_id: Uuid) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM propagation_jobs WHERE id = $1)")
            .bind(job_id)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn require_job(&self, job_id: Uuid) -> Result<(), RepoError> {
        if self.job_exists(job_id).await? {
            Ok(())
        } else {
            Err(RepoError::NotFound)
        }
    }
}

#[async_trait]
impl PropagationRepo for PostgresRepositories {
    async fn create_job(&self, job: NewPropagationJob) -> Result<PropagationJobRecord, RepoError> {
        let source = serde_json::to_value(&job.source).map_err(RepoError::from_persistence)?;
        let affected = job.target_string_ids.as_ref().map_or(0, |ids| ids.len()) as i64;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "INSERT INTO propagation_jobs (id, workspace_id, job_type, status, source, \
                 target_string_ids, affected_strings_count, metadata, retry_of, approved) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(job.workspace_id)
        .bind(job.job_type.as_str())
        .bind(source)
        .bind(job.target_string_ids)
        .bind(affected)
        .bind(job.metadata)
        .bind(job.retry_of)
        .bind(job.approved)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.try_into()
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<PropagationJobRecord>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM propagation_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(PropagationJobRecord::try_from).transpose()
    }

    async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
    ) -> Result<Vec<PropagationJobRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {JOB_COLUMNS} FROM propagation_jobs WHERE 1=1 "
        ));

        if let Some(workspace_id) = filter.workspace_id {
            qb.push("AND workspace_id = ");
            qb.push_bind(workspace_id);
        }

        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }

        if let Some(job_type) = filter.job_type {
            qb.push(" AND job_type = ");
            qb.push_bind(job_type.as_str());
        }

        let limit = filter.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(i64::from(limit));

        let rows = qb
            .build_query_as::<JobRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(PropagationJobRecord::try_from).collect()
    }

    async fn list_pending_jobs(&self, limit: u32) -> Result<Vec<Uuid>, RepoError> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM propagation_jobs \
             WHERE status = 'pending' AND approved \
             ORDER BY created_at, id LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Option<PropagationJobRecord>, RepoError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE propagation_jobs SET status = 'running', started_at = now() \
             WHERE id = $1 AND status = 'pending' AND approved \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(PropagationJobRecord::try_from).transpose()
    }

    async fn set_targets(&self, job_id: Uuid, string_ids: &[i64]) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE propagation_jobs \
             SET target_string_ids = $2, affected_strings_count = $3 \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(string_ids)
        .bind(string_ids.len() as i64)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn record_progress(&self, job_id: Uuid, failed: bool) -> Result<JobStatus, RepoError> {
        let status: Option<String> = sqlx::query_scalar(
            "UPDATE propagation_jobs \
             SET processed_count = processed_count + 1, \
                 failed_count = failed_count + CASE WHEN $2 THEN 1 ELSE 0 END \
             WHERE id = $1 AND processed_count < affected_strings_count \
             RETURNING status",
        )
        .bind(job_id)
        .bind(failed)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        match status {
            Some(status) => status.parse::<JobStatus>().map_err(RepoError::from_persistence),
            None => {
                self.require_job(job_id).await?;
                Err(RepoError::Integrity {
                    message: format!("job `{job_id}` already processed every target"),
                })
            }
        }
    }

    async fn finish_job(&self, job_id: Uuid, status: JobStatus) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE propagation_jobs SET status = $2, completed_at = now() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(status.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE propagation_jobs SET status = 'cancelled', completed_at = now() \
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(job_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn approve_job(&self, job_id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE propagation_jobs SET approved = TRUE \
             WHERE id = $1 AND status = 'pending' AND NOT approved",
        )
        .bind(job_id)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            self.require_job(job_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn record_error(
        &self,
        error: NewPropagationError,
    ) -> Result<PropagationErrorRecord, RepoError> {
        let row = sqlx::query_as::<_, ErrorRow>(&format!(
            "INSERT INTO propagation_errors (id, job_id, string_id, error_type, message, details) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {ERROR_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(error.job_id)
        .bind(error.string_id)
        .bind(error.error_type.as_str())
        .bind(error.message)
        .bind(error.details)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.try_into()
    }

    async fn list_errors(&self, job_id: Uuid) -> Result<Vec<PropagationErrorRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ErrorRow>(&format!(
            "SELECT {ERROR_COLUMNS} FROM propagation_errors \
             WHERE job_id = $1 ORDER BY created_at, id"
        ))
        .bind(job_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(PropagationErrorRecord::try_from)
            .collect()
    }

    async fn find_error(
        &self,
        error_id: Uuid,
    ) -> Result<Option<PropagationErrorRecord>, RepoError> {
        let row = sqlx::query_as::<_, ErrorRow>(&format!(
            "SELECT {ERROR_COLUMNS} FROM propagation_errors WHERE id = $1"
        ))
        .bind(error_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(PropagationErrorRecord::try_from).transpose()
    }

    async fn resolve_error(&self, error_id: Uuid) -> Result<bool, RepoError> {
        let resolved = sqlx::query_scalar::<_, Option<bool>>(
            "WITH target AS (SELECT id, is_resolved FROM propagation_errors WHERE id = $1), \
                  updated AS ( \
                      UPDATE propagation_errors e SET is_resolved = TRUE, resolved_at = now() \
                      FROM target WHERE e.id = target.id AND NOT target.is_resolved \
                      RETURNING e.id) \
             SELECT EXISTS (SELECT 1 FROM updated) FROM target",
        )
        .bind(error_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        match resolved {
            None => Err(RepoError::NotFound),
            Some(updated) => Ok(updated.unwrap_or(false)),
        }
    }
}
