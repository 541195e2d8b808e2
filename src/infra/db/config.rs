use async_trait::async_trait;
use sqlx::FromRow;

use crate::application::repos::{ConfigRepo, RepoError};
use crate::domain::entities::{
    DimensionRecord, DimensionValueRecord, FieldRecord, PlatformRecord, RuleDetailRecord,
    RuleRecord,
};
use crate::domain::types::DimensionType;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(Debug, FromRow)]
struct RuleRow {
    id: i64,
    workspace_id: i64,
    platform_id: i64,
    name: String,
    pattern: String,
    is_active: bool,
}

#[derive(Debug, FromRow)]
struct RuleDetailRow {
    id: i64,
    rule_id: i64,
    field_id: i64,
    dimension_id: Option<i64>,
    detail_order: i32,
    is_required: bool,
}

impl From<RuleDetailRow> for RuleDetailRecord {
    fn from(row: RuleDetailRow) -> Self {
        Self {
            id: row.id,
            rule_id: row.rule_id,
            field_id: row.field_id,
            dimension_id: row.dimension_id,
            order: row.detail_order,
            is_required: row.is_required,
        }
    }
}

#[derive(Debug, FromRow)]
struct DimensionRow {
    id: i64,
    workspace_id: i64,
    name: String,
    dimension_type: String,
}

impl TryFrom<DimensionRow> for DimensionRecord {
    type Error = RepoError;

    fn try_from(row: DimensionRow) -> Result<Self, Self::Error> {
        let dimension_type = DimensionType::try_from(row.dimension_type.as_str())
            .map_err(RepoError::from_persistence)?;
        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            dimension_type,
        })
    }
}

#[derive(Debug, FromRow)]
struct DimensionValueRow {
    id: i64,
    workspace_id: i64,
    dimension_id: i64,
    value: String,
    label: String,
}

impl From<DimensionValueRow> for DimensionValueRecord {
    fn from(row: DimensionValueRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            dimension_id: row.dimension_id,
            value: row.value,
            label: row.label,
        }
    }
}

#[derive(Debug, FromRow)]
struct FieldRow {
    id: i64,
    platform_id: i64,
    name: String,
    level: i32,
    next_field_id: Option<i64>,
}

impl From<FieldRow> for FieldRecord {
    fn from(row: FieldRow) -> Self {
        Self {
            id: row.id,
            platform_id: row.platform_id,
            name: row.name,
            level: row.level,
            next_field_id: row.next_field_id,
        }
    }
}

#[derive(Debug, FromRow)]
struct PlatformRow {
    id: i64,
    name: String,
    slug: String,
}

#[async_trait]
impl ConfigRepo for PostgresRepositories {
    async fn find_rule(&self, rule_id: i64) -> Result<Option<RuleRecord>, RepoError> {
        let row = sqlx::query_as::<_, RuleRow>(
            "SELECT id, workspace_id, platform_id, name, pattern, is_active \
             FROM rules WHERE id = $1",
        )
        .bind(rule_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let details = sqlx::query_as::<_, RuleDetailRow>(
            "SELECT id, rule_id, field_id, dimension_id, detail_order, is_required \
             FROM rule_details WHERE rule_id = $1 ORDER BY detail_order, id",
        )
        .bind(rule_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Some(RuleRecord {
            id: row.id,
            workspace_id: row.workspace_id,
            platform_id: row.platform_id,
            name: row.name,
            pattern: row.pattern,
            is_active: row.is_active,
            details: details.into_iter().map(RuleDetailRecord::from).collect(),
        }))
    }

    async fn list_rule_ids_by_dimension(
        &self,
        workspace_id: i64,
        dimension_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT r.id FROM rules r \
             JOIN rule_details d ON d.rule_id = r.id \
             WHERE r.workspace_id = $1 AND d.dimension_id = $2 \
             ORDER BY r.id",
        )
        .bind(workspace_id)
        .bind(dimension_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_rule_ids_by_field(
        &self,
        workspace_id: i64,
        field_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT r.id FROM rules r \
             JOIN rule_details d ON d.rule_id = r.id \
             WHERE r.workspace_id = $1 AND d.field_id = $2 \
             ORDER BY r.id",
        )
        .bind(workspace_id)
        .bind(field_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn list_rule_ids_by_platform(
        &self,
        workspace_id: i64,
        platform_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM rules WHERE workspace_id = $1 AND platform_id = $2 ORDER BY id",
        )
        .bind(workspace_id)
        .bind(platform_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn find_dimension_value(
        &self,
        dimension_value_id: i64,
    ) -> Result<Option<DimensionValueRecord>, RepoError> {
        let row = sqlx::query_as::<_, DimensionValueRow>(
            "SELECT id, workspace_id, dimension_id, value, label \
             FROM dimension_values WHERE id = $1",
        )
        .bind(dimension_value_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(DimensionValueRecord::from))
    }

    async fn list_dimensions(
        &self,
        workspace_id: i64,
        dimension_ids: &[i64],
    ) -> Result<Vec<DimensionRecord>, RepoError> {
        let rows = sqlx::query_as::<_, DimensionRow>(
            "SELECT id, workspace_id, name, dimension_type FROM dimensions \
             WHERE workspace_id = $1 AND id = ANY($2) ORDER BY id",
        )
        .bind(workspace_id)
        .bind(dimension_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(DimensionRecord::try_from).collect()
    }

    async fn list_dimension_values(
        &self,
        workspace_id: i64,
        dimension_ids: &[i64],
    ) -> Result<Vec<DimensionValueRecord>, RepoError> {
        let rows = sqlx::query_as::<_, DimensionValueRow>(
            "SELECT id, workspace_id, dimension_id, value, label FROM dimension_values \
             WHERE workspace_id = $1 AND dimension_id = ANY($2) \
             ORDER BY dimension_id, id",
        )
        .bind(workspace_id)
        .bind(dimension_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(DimensionValueRecord::from).collect())
    }

    async fn list_fields(&self, field_ids: &[i64]) -> Result<Vec<FieldRecord>, RepoError> {
        let rows = sqlx::query_as::<_, FieldRow>(
            "SELECT id, platform_id, name, level, next_field_id FROM fields \
             WHERE id = ANY($1) ORDER BY level, id",
        )
        .bind(field_ids)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(FieldRecord::from).collect())
    }

    async fn find_platform(&self, platform_id: i64) -> Result<Option<PlatformRecord>, RepoError> {
        let row = sqlx::query_as::<_, PlatformRow>(
            "SELECT id, name, slug FROM platforms WHERE id = $1",
        )
        .bind(platform_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|row| PlatformRecord {
            id: row.id,
            name: row.name,
            slug: row.slug,
        }))
    }
}
