use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::application::repos::{RepoError, StringsRepo};
use crate::domain::entities::{StringDetailRecord, StringRecord};

use super::{PostgresRepositories, map_sqlx_error};

const STRING_COLUMNS: &str =
    "id, workspace_id, rule_id, field_id, parent_id, value, version, updated_at";

#[derive(Debug, FromRow)]
struct StringRow {
    id: i64,
    workspace_id: i64,
    rule_id: i64,
    field_id: i64,
    parent_id: Option<i64>,
    value: String,
    version: i64,
    updated_at: OffsetDateTime,
}

impl From<StringRow> for StringRecord {
    fn from(row: StringRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            rule_id: row.rule_id,
            field_id: row.field_id,
            parent_id: row.parent_id,
            value: row.value,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StringDetailRow {
    id: i64,
    string_id: i64,
    dimension_id: i64,
    dimension_value_id: Option<i64>,
    freetext: Option<String>,
    detail_order: i32,
}

impl From<StringDetailRow> for StringDetailRecord {
    fn from(row: StringDetailRow) -> Self {
        Self {
            id: row.id,
            string_id: row.string_id,
            dimension_id: row.dimension_id,
            dimension_value_id: row.dimension_value_id,
            freetext: row.freetext,
            order: row.detail_order,
        }
    }
}

#[async_trait]
impl StringsRepo for PostgresRepositories {
    async fn find_string(&self, string_id: i64) -> Result<Option<StringRecord>, RepoError> {
        let row = sqlx::query_as::<_, StringRow>(&format!(
            "SELECT {STRING_COLUMNS} FROM strings WHERE id = $1"
        ))
        .bind(string_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(StringRecord::from))
    }

    async fn list_details(&self, string_id: i64) -> Result<Vec<StringDetailRecord>, RepoError> {
        let rows = sqlx::query_as::<_, StringDetailRow>(
            "SELECT id, string_id, dimension_id, dimension_value_id, freetext, detail_order \
             FROM string_details WHERE string_id = $1 ORDER BY detail_order, id",
        )
        .bind(string_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(StringDetailRecord::from).collect())
    }

    async fn list_string_ids_by_dimension_value(
        &self,
        workspace_id: i64,
        dimension_value_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT s.id FROM strings s \
             JOIN string_details d ON d.string_id = s.id \
             WHERE s.workspace_id = $1 AND d.dimension_value_id = $2 \
             ORDER BY s.id",
        )
        .bind(workspace_id)
        .bind(dimension_value_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_string_ids_by_rule(
        &self,
        workspace_id: i64,
        rule_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM strings WHERE workspace_id = $1 AND rule_id = $2 ORDER BY id",
        )
        .bind(workspace_id)
        .bind(rule_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_children(&self, string_id: i64) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM strings WHERE parent_id = $1 ORDER BY id")
            .bind(string_id)
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_by_value(
        &self,
        workspace_id: i64,
        rule_id: i64,
        field_id: i64,
        value: &str,
    ) -> Result<Option<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM strings \
             WHERE workspace_id = $1 AND rule_id = $2 AND field_id = $3 AND value = $4",
        )
        .bind(workspace_id)
        .bind(rule_id)
        .bind(field_id)
        .bind(value)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn update_string_value(
        &self,
        string_id: i64,
        expected_version: i64,
        value: &str,
    ) -> Result<StringRecord, RepoError> {
        let updated = sqlx::query_as::<_, StringRow>(&format!(
            "UPDATE strings SET value = $3, version = version + 1, updated_at = now() \
             WHERE id = $1 AND version = $2 \
             RETURNING {STRING_COLUMNS}"
        ))
        .bind(string_id)
        .bind(expected_version)
        .bind(value)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = updated {
            return Ok(row.into());
        }

        let current = sqlx::query_scalar::<_, i64>("SELECT version FROM strings WHERE id = $1")
            .bind(string_id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        match current {
            None => Err(RepoError::NotFound),
            Some(version) => Err(RepoError::Conflict {
                message: format!(
                    "string {string_id} is at version {version}, expected {expected_version}"
                ),
            }),
        }
    }
}
