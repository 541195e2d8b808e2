use async_trait::async_trait;
use sqlx::FromRow;

use crate::application::repos::{RepoError, SettingsRepo};
use crate::domain::entities::PropagationSettingsRecord;

use super::{PostgresRepositories, map_sqlx_error, to_u32};

#[derive(Debug, FromRow)]
struct SettingsRow {
    workspace_id: i64,
    auto_propagate: bool,
    require_approval: bool,
    notify_on_completion: bool,
    notify_on_failure: bool,
    batch_size: i32,
    retry_attempts: i32,
    retry_delay_seconds: i32,
}

impl TryFrom<SettingsRow> for PropagationSettingsRecord {
    type Error = RepoError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        Ok(Self {
            workspace_id: row.workspace_id,
            auto_propagate: row.auto_propagate,
            require_approval: row.require_approval,
            notify_on_completion: row.notify_on_completion,
            notify_on_failure: row.notify_on_failure,
            batch_size: to_u32(row.batch_size, "batch_size")?,
            retry_attempts: to_u32(row.retry_attempts, "retry_attempts")?,
            retry_delay_seconds: to_u32(row.retry_delay_seconds, "retry_delay_seconds")?,
        })
    }
}

fn to_i32(value: u32, column: &str) -> Result<i32, RepoError> {
    i32::try_from(value).map_err(|_| RepoError::InvalidInput {
        message: format!("`{column}` out of range: {value}"),
    })
}

#[async_trait]
impl SettingsRepo for PostgresRepositories {
    async fn load_settings(
        &self,
        workspace_id: i64,
    ) -> Result<PropagationSettingsRecord, RepoError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            "SELECT workspace_id, auto_propagate, require_approval, notify_on_completion, \
                    notify_on_failure, batch_size, retry_attempts, retry_delay_seconds \
             FROM propagation_settings WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(PropagationSettingsRecord::defaults_for(workspace_id)),
        }
    }

    async fn save_settings(&self, settings: &PropagationSettingsRecord) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO propagation_settings (workspace_id, auto_propagate, require_approval, \
                 notify_on_completion, notify_on_failure, batch_size, retry_attempts, \
                 retry_delay_seconds) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (workspace_id) DO UPDATE SET \
                 auto_propagate = EXCLUDED.auto_propagate, \
                 require_approval = EXCLUDED.require_approval, \
                 notify_on_completion = EXCLUDED.notify_on_completion, \
                 notify_on_failure = EXCLUDED.notify_on_failure, \
                 batch_size = EXCLUDED.batch_size, \
                 retry_attempts = EXCLUDED.retry_attempts, \
                 retry_delay_seconds = EXCLUDED.retry_delay_seconds",
        )
        .bind(settings.workspace_id)
        .bind(settings.auto_propagate)
        .bind(settings.require_approval)
        .bind(settings.notify_on_completion)
        .bind(settings.notify_on_failure)
        .bind(to_i32(settings.batch_size, "batch_size")?)
        .bind(to_i32(settings.retry_attempts, "retry_attempts")?)
        .bind(to_i32(settings.retry_delay_seconds, "retry_delay_seconds")?)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
