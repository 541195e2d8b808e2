//! Persisted configuration, string and propagation records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::types::{DimensionType, JobStatus, JobType, PropagationErrorType, SourceReference};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub id: i64,
    pub name: String,
    pub slug: String,
}

/// A naming level on a platform (e.g. campaign, ad group, ad).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub id: i64,
    pub platform_id: i64,
    pub name: String,
    pub level: i32,
    /// Field one level below this one, if any.
    pub next_field_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionRecord {
    pub id: i64,
    pub workspace_id: i64,
    pub name: String,
    pub dimension_type: DimensionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValueRecord {
    pub id: i64,
    pub workspace_id: i64,
    pub dimension_id: i64,
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDetailRecord {
    pub id: i64,
    pub rule_id: i64,
    pub field_id: i64,
    pub dimension_id: Option<i64>,
    pub order: i32,
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRecord {
    pub id: i64,
    pub workspace_id: i64,
    pub platform_id: i64,
    pub name: String,
    pub pattern: String,
    pub is_active: bool,
    /// Ordered by `order`.
    pub details: Vec<RuleDetailRecord>,
}

impl RuleRecord {
    pub fn dimension_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.details.iter().filter_map(|d| d.dimension_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn field_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.details.iter().map(|d| d.field_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn detail_for(&self, field_id: i64, dimension_id: i64) -> Option<&RuleDetailRecord> {
        self.details
            .iter()
            .find(|d| d.field_id == field_id && d.dimension_id == Some(dimension_id))
    }
}

/// A generated naming string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringRecord {
    pub id: i64,
    pub workspace_id: i64,
    pub rule_id: i64,
    pub field_id: i64,
    pub parent_id: Option<i64>,
    pub value: String,
    /// Bumped on every write; used for compare-and-set updates.
    pub version: i64,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringDetailRecord {
    pub id: i64,
    pub string_id: i64,
    pub dimension_id: i64,
    pub dimension_value_id: Option<i64>,
    pub freetext: Option<String>,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationJobRecord {
    pub id: Uuid,
    pub workspace_id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub source: SourceReference,
    /// Resolved when processing starts; fixed afterwards.
    pub target_string_ids: Option<Vec<i64>>,
    pub affected_strings_count: u64,
    pub processed_count: u64,
    pub failed_count: u64,
    pub metadata: serde_json::Value,
    pub retry_of: Option<Uuid>,
    /// False while an auto-created job waits for approval.
    pub approved: bool,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
}

impl PropagationJobRecord {
    /// Terminal status implied by the counters once every target is resolved.
    pub fn outcome(&self) -> JobStatus {
        if self.failed_count == 0 {
            JobStatus::Completed
        } else if self.failed_count < self.affected_strings_count {
            JobStatus::Partial
        } else {
            JobStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationErrorRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub string_id: i64,
    pub error_type: PropagationErrorType,
    pub message: String,
    pub details: serde_json::Value,
    pub is_resolved: bool,
    pub created_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
}

pub const DEFAULT_BATCH_SIZE: u32 = 100;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationSettingsRecord {
    pub workspace_id: i64,
    pub auto_propagate: bool,
    pub require_approval: bool,
    pub notify_on_completion: bool,
    pub notify_on_failure: bool,
    pub batch_size: u32,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u32,
}

impl PropagationSettingsRecord {
    pub fn defaults_for(workspace_id: i64) -> Self {
        Self {
            workspace_id,
            auto_propagate: true,
            require_approval: false,
            notify_on_completion: false,
            notify_on_failure: true,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(affected: u64, failed: u64) -> PropagationJobRecord {
        PropagationJobRecord {
            id: Uuid::new_v4(),
            workspace_id: 1,
            job_type: JobType::Manual,
            status: JobStatus::Running,
            source: SourceReference::Strings { string_ids: vec![] },
            target_string_ids: None,
            affected_strings_count: affected,
            processed_count: affected,
            failed_count: failed,
            metadata: serde_json::Value::Null,
            retry_of: None,
            approved: true,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn outcome_follows_failure_ratio() {
        assert_eq!(job(0, 0).outcome(), JobStatus::Completed);
        assert_eq!(job(15, 0).outcome(), JobStatus::Completed);
        assert_eq!(job(15, 3).outcome(), JobStatus::Partial);
        assert_eq!(job(3, 3).outcome(), JobStatus::Failed);
    }

    #[test]
    fn rule_dimension_ids_are_deduplicated() {
        let detail = |id, field_id, dimension_id, order| RuleDetailRecord {
            id,
            rule_id: 5,
            field_id,
            dimension_id,
            order,
            is_required: true,
        };
        let rule = RuleRecord {
            id: 5,
            workspace_id: 1,
            platform_id: 1,
            name: "campaign".to_string(),
            pattern: "{client}-{region}".to_string(),
            is_active: true,
            details: vec![
                detail(1, 100, Some(2), 1),
                detail(2, 100, Some(3), 2),
                detail(3, 101, Some(2), 1),
                detail(4, 101, None, 2),
            ],
        };
        assert_eq!(rule.dimension_ids(), vec![2, 3]);
        assert_eq!(rule.field_ids(), vec![100, 101]);
        assert_eq!(rule.detail_for(101, 2).map(|d| d.id), Some(3));
        assert!(rule.detail_for(101, 3).is_none());
    }

    #[test]
    fn default_settings() {
        let settings = PropagationSettingsRecord::defaults_for(7);
        assert!(settings.auto_propagate);
        assert!(!settings.require_approval);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.retry_attempts, 3);
    }
}
