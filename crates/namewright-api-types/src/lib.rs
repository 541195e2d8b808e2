//! Request and response types shared by the namewright server and its clients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DimensionValueChange,
    ParentStringChange,
    RulePatternChange,
    Manual,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::DimensionValueChange => "dimension_value_change",
            JobType::ParentStringChange => "parent_string_change",
            JobType::RulePatternChange => "rule_pattern_change",
            JobType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationErrorType {
    InvalidDimensionValue,
    RequiredDimensionMissing,
    EntityMismatch,
    UniquenessConflict,
    ConfigurationError,
    LockContention,
    SystemError,
}

impl PropagationErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            PropagationErrorType::InvalidDimensionValue => "invalid_dimension_value",
            PropagationErrorType::RequiredDimensionMissing => "required_dimension_missing",
            PropagationErrorType::EntityMismatch => "entity_mismatch",
            PropagationErrorType::UniquenessConflict => "uniqueness_conflict",
            PropagationErrorType::ConfigurationError => "configuration_error",
            PropagationErrorType::LockContention => "lock_contention",
            PropagationErrorType::SystemError => "system_error",
        }
    }
}

/// Returned when a persisted or user-supplied enum label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} `{}`", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! impl_labels {
    ($ty:ident, $kind:literal, [$($variant:ident),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                $(
                    if value == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                Err(UnknownVariant {
                    kind: $kind,
                    value: value.to_string(),
                })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_labels!(
    JobType,
    "job type",
    [DimensionValueChange, ParentStringChange, RulePatternChange, Manual]
);
impl_labels!(
    JobStatus,
    "job status",
    [Pending, Running, Completed, Partial, Failed, Cancelled]
);
impl_labels!(
    PropagationErrorType,
    "error type",
    [
        InvalidDimensionValue,
        RequiredDimensionMissing,
        EntityMismatch,
        UniquenessConflict,
        ConfigurationError,
        LockContention,
        SystemError,
    ]
);

// ============================================================================
// Jobs
// ============================================================================

/// Where a job's target set comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceReference {
    DimensionValue { dimension_value_id: i64 },
    ParentString { string_id: i64 },
    Rule { rule_id: i64 },
    Strings { string_ids: Vec<i64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub workspace_id: i64,
    pub job_type: JobType,
    pub source: SourceReference,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryJobRequest {
    #[serde(default)]
    pub retry_failed_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobListQuery {
    pub workspace_id: Option<i64>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: Uuid,
    pub workspace_id: i64,
    pub job_type: JobType,
    pub status: JobStatus,
    pub source: SourceReference,
    pub affected_strings_count: u64,
    pub processed_count: u64,
    pub failed_count: u64,
    pub metadata: serde_json::Value,
    pub retry_of: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub items: Vec<JobResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationErrorResponse {
    pub id: Uuid,
    pub job_id: Uuid,
    pub string_id: i64,
    pub error_type: PropagationErrorType,
    pub message: String,
    pub details: serde_json::Value,
    pub is_resolved: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorListResponse {
    pub items: Vec<PropagationErrorResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveErrorResponse {
    pub resolved: bool,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationSettingsResponse {
    pub workspace_id: i64,
    pub auto_propagate: bool,
    pub require_approval: bool,
    pub notify_on_completion: bool,
    pub notify_on_failure: bool,
    pub batch_size: u32,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchPropagationSettingsRequest {
    pub auto_propagate: Option<bool>,
    pub require_approval: Option<bool>,
    pub notify_on_completion: Option<bool>,
    pub notify_on_failure: Option<bool>,
    pub batch_size: Option<u32>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_seconds: Option<u32>,
}

// ============================================================================
// Mutation signals
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

/// Entity touched by a persistence-layer mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutatedEntity {
    Dimension {
        dimension_id: i64,
    },
    DimensionValue {
        dimension_value_id: i64,
        dimension_id: i64,
    },
    Rule {
        rule_id: i64,
    },
    RuleDetail {
        rule_id: i64,
    },
    Field {
        field_id: i64,
    },
    Platform {
        platform_id: i64,
    },
    String {
        string_id: i64,
    },
}

/// What changed, for logging and for deciding whether downstream strings move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescription {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<DataImpact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataImpact {
    DimensionValueChanged {
        dimension_value_id: i64,
        old_value: String,
        new_value: String,
    },
    RulePatternChanged {
        rule_id: i64,
        old_pattern: String,
        new_pattern: String,
    },
    ParentStringChanged {
        string_id: i64,
        old_value: String,
        new_value: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    pub workspace_id: i64,
    pub op: MutationOp,
    pub entity: MutatedEntity,
    #[serde(default)]
    pub change: ChangeDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationResponse {
    pub event_id: Uuid,
    pub affected_rules: Vec<i64>,
    pub keys_deleted: usize,
    pub job_id: Option<Uuid>,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}
