//! In-process repository implementations.
//!
//! Used when no database URL is configured and by the test suites. Besides the
//! repository traits, [`MemoryRepositories`] exposes seeding and mutation
//! helpers standing in for the external CRUD layer.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    ConfigRepo, JobQueryFilter, NewPropagationError, NewPropagationJob, PropagationRepo,
    RepoError, SettingsRepo, StringsRepo,
};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{
    DimensionRecord, DimensionValueRecord, FieldRecord, PlatformRecord, PropagationErrorRecord,
    PropagationJobRecord, PropagationSettingsRecord, RuleRecord, StringDetailRecord, StringRecord,
};
use crate::domain::types::JobStatus;

const SOURCE: &str = "infra::memory";
const STRING_VALUE_CONSTRAINT: &str = "strings_workspace_rule_field_value_key";

#[derive(Default)]
struct State {
    platforms: BTreeMap<i64, PlatformRecord>,
    fields: BTreeMap<i64, FieldRecord>,
    dimensions: BTreeMap<i64, DimensionRecord>,
    values: BTreeMap<i64, DimensionValueRecord>,
    rules: BTreeMap<i64, RuleRecord>,
    strings: BTreeMap<i64, StringRecord>,
    details: BTreeMap<i64, Vec<StringDetailRecord>>,
    jobs: HashMap<Uuid, PropagationJobRecord>,
    job_order: Vec<Uuid>,
    errors: Vec<PropagationErrorRecord>,
    settings: HashMap<i64, PropagationSettingsRecord>,
    /// Remaining injected write conflicts per string.
    conflicts: HashMap<i64, u32>,
    string_writes: u64,
}

#[derive(Default)]
pub struct MemoryRepositories {
    state: RwLock<State>,
    next_detail_id: AtomicI64,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    pub fn insert_platform(&self, platform: PlatformRecord) {
        rw_write(&self.state, SOURCE, "insert_platform")
            .platforms
            .insert(platform.id, platform);
    }

    pub fn insert_field(&self, field: FieldRecord) {
        rw_write(&self.state, SOURCE, "insert_field")
            .fields
            .insert(field.id, field);
    }

    pub fn insert_dimension(&self, dimension: DimensionRecord) {
        rw_write(&self.state, SOURCE, "insert_dimension")
            .dimensions
            .insert(dimension.id, dimension);
    }

    pub fn insert_dimension_value(&self, value: DimensionValueRecord) {
        rw_write(&self.state, SOURCE, "insert_dimension_value")
            .values
            .insert(value.id, value);
    }

    pub fn insert_rule(&self, mut rule: RuleRecord) {
        rule.details.sort_by_key(|d| d.order);
        rw_write(&self.state, SOURCE, "insert_rule")
            .rules
            .insert(rule.id, rule);
    }

    /// Insert a string with `(dimension_id, dimension_value_id, freetext)` details in order.
    pub fn insert_string(
        &self,
        string: StringRecord,
        details: &[(i64, Option<i64>, Option<&str>)],
    ) {
        let details = details
            .iter()
            .enumerate()
            .map(|(index, (dimension_id, value_id, freetext))| StringDetailRecord {
                id: self.next_detail_id.fetch_add(1, Ordering::Relaxed) + 1,
                string_id: string.id,
                dimension_id: *dimension_id,
                dimension_value_id: *value_id,
                freetext: freetext.map(str::to_string),
                order: index as i32 + 1,
            })
            .collect();
        let mut state = rw_write(&self.state, SOURCE, "insert_string");
        state.details.insert(string.id, details);
        state.strings.insert(string.id, string);
    }

    // ========================================================================
    // Configuration mutations
    // ========================================================================

    /// Returns the previous record.
    pub fn update_dimension_value(
        &self,
        id: i64,
        value: &str,
        label: &str,
    ) -> Option<DimensionValueRecord> {
        let mut state = rw_write(&self.state, SOURCE, "update_dimension_value");
        let record = state.values.get_mut(&id)?;
        let before = record.clone();
        record.value = value.to_string();
        record.label = label.to_string();
        Some(before)
    }

    pub fn update_rule_pattern(&self, rule_id: i64, pattern: &str) -> Option<RuleRecord> {
        let mut state = rw_write(&self.state, SOURCE, "update_rule_pattern");
        let rule = state.rules.get_mut(&rule_id)?;
        let before = rule.clone();
        rule.pattern = pattern.to_string();
        Some(before)
    }

    pub fn set_rule_active(&self, rule_id: i64, is_active: bool) {
        if let Some(rule) = rw_write(&self.state, SOURCE, "set_rule_active")
            .rules
            .get_mut(&rule_id)
        {
            rule.is_active = is_active;
        }
    }

    pub fn delete_rule(&self, rule_id: i64) -> Option<RuleRecord> {
        rw_write(&self.state, SOURCE, "delete_rule")
            .rules
            .remove(&rule_id)
    }

    /// Write a string value directly, bumping its version. Returns the previous record.
    pub fn set_string_value(&self, string_id: i64, value: &str) -> Option<StringRecord> {
        let mut state = rw_write(&self.state, SOURCE, "set_string_value");
        let record = state.strings.get_mut(&string_id)?;
        let before = record.clone();
        record.value = value.to_string();
        record.version += 1;
        record.updated_at = OffsetDateTime::now_utc();
        Some(before)
    }

    /// Make the next `count` compare-and-set writes to `string_id` fail with a conflict.
    pub fn inject_write_conflicts(&self, string_id: i64, count: u32) {
        rw_write(&self.state, SOURCE, "inject_write_conflicts")
            .conflicts
            .insert(string_id, count);
    }

    pub fn string_value(&self, string_id: i64) -> Option<String> {
        rw_read(&self.state, SOURCE, "string_value")
            .strings
            .get(&string_id)
            .map(|s| s.value.clone())
    }

    /// Successful string writes since construction.
    pub fn string_writes(&self) -> u64 {
        rw_read(&self.state, SOURCE, "string_writes").string_writes
    }

    fn rule_ids_where(
        &self,
        workspace_id: i64,
        op: &'static str,
        predicate: impl Fn(&RuleRecord) -> bool,
    ) -> Vec<i64> {
        rw_read(&self.state, SOURCE, op)
            .rules
            .values()
            .filter(|rule| rule.workspace_id == workspace_id && predicate(rule))
            .map(|rule| rule.id)
            .collect()
    }
}

#[async_trait]
impl ConfigRepo for MemoryRepositories {
    async fn find_rule(&self, rule_id: i64) -> Result<Option<RuleRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_rule")
            .rules
            .get(&rule_id)
            .cloned())
    }

    async fn list_rule_ids_by_dimension(
        &self,
        workspace_id: i64,
        dimension_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        Ok(
            self.rule_ids_where(workspace_id, "list_rule_ids_by_dimension", |rule| {
                rule.details
                    .iter()
                    .any(|d| d.dimension_id == Some(dimension_id))
            }),
        )
    }

    async fn list_rule_ids_by_field(
        &self,
        workspace_id: i64,
        field_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        Ok(
            self.rule_ids_where(workspace_id, "list_rule_ids_by_field", |rule| {
                rule.details.iter().any(|d| d.field_id == field_id)
            }),
        )
    }

    async fn list_rule_ids_by_platform(
        &self,
        workspace_id: i64,
        platform_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        Ok(
            self.rule_ids_where(workspace_id, "list_rule_ids_by_platform", |rule| {
                rule.platform_id == platform_id
            }),
        )
    }

    async fn find_dimension_value(
        &self,
        dimension_value_id: i64,
    ) -> Result<Option<DimensionValueRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_dimension_value")
            .values
            .get(&dimension_value_id)
            .cloned())
    }

    async fn list_dimensions(
        &self,
        workspace_id: i64,
        dimension_ids: &[i64],
    ) -> Result<Vec<DimensionRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_dimensions")
            .dimensions
            .values()
            .filter(|d| d.workspace_id == workspace_id && dimension_ids.contains(&d.id))
            .cloned()
            .collect())
    }

    async fn list_dimension_values(
        &self,
        workspace_id: i64,
        dimension_ids: &[i64],
    ) -> Result<Vec<DimensionValueRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_dimension_values")
            .values
            .values()
            .filter(|v| v.workspace_id == workspace_id && dimension_ids.contains(&v.dimension_id))
            .cloned()
            .collect())
    }

    async fn list_fields(&self, field_ids: &[i64]) -> Result<Vec<FieldRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_fields")
            .fields
            .values()
            .filter(|f| field_ids.contains(&f.id))
            .cloned()
            .collect())
    }

    async fn find_platform(&self, platform_id: i64) -> Result<Option<PlatformRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_platform")
            .platforms
            .get(&platform_id)
            .cloned())
    }
}

#[async_trait]
impl StringsRepo for MemoryRepositories {
    async fn find_string(&self, string_id: i64) -> Result<Option<StringRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_string")
            .strings
            .get(&string_id)
            .cloned())
    }

    async fn list_details(&self, string_id: i64) -> Result<Vec<StringDetailRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_details")
            .details
            .get(&string_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_string_ids_by_dimension_value(
        &self,
        workspace_id: i64,
        dimension_value_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        let state = rw_read(&self.state, SOURCE, "list_string_ids_by_dimension_value");
        Ok(state
            .strings
            .values()
            .filter(|s| s.workspace_id == workspace_id)
            .filter(|s| {
                state.details.get(&s.id).is_some_and(|details| {
                    details
                        .iter()
                        .any(|d| d.dimension_value_id == Some(dimension_value_id))
                })
            })
            .map(|s| s.id)
            .collect())
    }

    async fn list_string_ids_by_rule(
        &self,
        workspace_id: i64,
        rule_id: i64,
    ) -> Result<Vec<i64>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_string_ids_by_rule")
            .strings
            .values()
            .filter(|s| s.workspace_id == workspace_id && s.rule_id == rule_id)
            .map(|s| s.id)
            .collect())
    }

    async fn list_children(&self, string_id: i64) -> Result<Vec<i64>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_children")
            .strings
            .values()
            .filter(|s| s.parent_id == Some(string_id))
            .map(|s| s.id)
            .collect())
    }

    async fn find_by_value(
        &self,
        workspace_id: i64,
        rule_id: i64,
        field_id: i64,
        value: &str,
    ) -> Result<Option<i64>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_by_value")
            .strings
            .values()
            .find(|s| {
                s.workspace_id == workspace_id
                    && s.rule_id == rule_id
                    && s.field_id == field_id
                    && s.value == value
            })
            .map(|s| s.id))
    }

    async fn update_string_value(
        &self,
        string_id: i64,
        expected_version: i64,
        value: &str,
    ) -> Result<StringRecord, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "update_string_value");

        if let Some(remaining) = state.conflicts.get_mut(&string_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(RepoError::Conflict {
                message: format!("string `{string_id}` is locked by another writer"),
            });
        }

        let current = state.strings.get(&string_id).ok_or(RepoError::NotFound)?;
        if current.version != expected_version {
            return Err(RepoError::Conflict {
                message: format!(
                    "string `{string_id}` moved from version {expected_version} to {}",
                    current.version
                ),
            });
        }
        let taken = state.strings.values().any(|other| {
            other.id != string_id
                && other.workspace_id == current.workspace_id
                && other.rule_id == current.rule_id
                && other.field_id == current.field_id
                && other.value == value
        });
        if taken {
            return Err(RepoError::Duplicate {
                constraint: STRING_VALUE_CONSTRAINT.to_string(),
            });
        }

        state.string_writes += 1;
        let record = state.strings.get_mut(&string_id).ok_or(RepoError::NotFound)?;
        record.value = value.to_string();
        record.version += 1;
        record.updated_at = OffsetDateTime::now_utc();
        Ok(record.clone())
    }
}

#[async_trait]
impl PropagationRepo for MemoryRepositories {
    async fn create_job(&self, job: NewPropagationJob) -> Result<PropagationJobRecord, RepoError> {
        let record = PropagationJobRecord {
            id: Uuid::new_v4(),
            workspace_id: job.workspace_id,
            job_type: job.job_type,
            status: JobStatus::Pending,
            source: job.source,
            affected_strings_count: job
                .target_string_ids
                .as_ref()
                .map_or(0, |ids| ids.len() as u64),
            target_string_ids: job.target_string_ids,
            processed_count: 0,
            failed_count: 0,
            metadata: job.metadata,
            retry_of: job.retry_of,
            approved: job.approved,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        };
        let mut state = rw_write(&self.state, SOURCE, "create_job");
        state.job_order.push(record.id);
        state.jobs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<PropagationJobRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_job")
            .jobs
            .get(&job_id)
            .cloned())
    }

    async fn list_jobs(
        &self,
        filter: &JobQueryFilter,
    ) -> Result<Vec<PropagationJobRecord>, RepoError> {
        let state = rw_read(&self.state, SOURCE, "list_jobs");
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(state
            .job_order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| filter.workspace_id.is_none_or(|ws| job.workspace_id == ws))
            .filter(|job| filter.status.is_none_or(|s| job.status == s))
            .filter(|job| filter.job_type.is_none_or(|t| job.job_type == t))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_pending_jobs(&self, limit: u32) -> Result<Vec<Uuid>, RepoError> {
        let state = rw_read(&self.state, SOURCE, "list_pending_jobs");
        Ok(state
            .job_order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|job| job.status == JobStatus::Pending && job.approved)
            .take(limit as usize)
            .map(|job| job.id)
            .collect())
    }

    async fn claim_job(&self, job_id: Uuid) -> Result<Option<PropagationJobRecord>, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "claim_job");
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending && job.approved => {
                job.status = JobStatus::Running;
                job.started_at = Some(OffsetDateTime::now_utc());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn set_targets(&self, job_id: Uuid, string_ids: &[i64]) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "set_targets");
        let job = state.jobs.get_mut(&job_id).ok_or(RepoError::NotFound)?;
        job.target_string_ids = Some(string_ids.to_vec());
        job.affected_strings_count = string_ids.len() as u64;
        Ok(())
    }

    async fn record_progress(&self, job_id: Uuid, failed: bool) -> Result<JobStatus, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "record_progress");
        let job = state.jobs.get_mut(&job_id).ok_or(RepoError::NotFound)?;
        if job.processed_count >= job.affected_strings_count {
            return Err(RepoError::Integrity {
                message: format!("job `{job_id}` already processed every target"),
            });
        }
        job.processed_count += 1;
        if failed {
            job.failed_count += 1;
        }
        Ok(job.status)
    }

    async fn finish_job(&self, job_id: Uuid, status: JobStatus) -> Result<bool, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "finish_job");
        let job = state.jobs.get_mut(&job_id).ok_or(RepoError::NotFound)?;
        if job.status != JobStatus::Running {
            return Ok(false);
        }
        job.status = status;
        job.completed_at = Some(OffsetDateTime::now_utc());
        Ok(true)
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<bool, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "cancel_job");
        let job = state.jobs.get_mut(&job_id).ok_or(RepoError::NotFound)?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(OffsetDateTime::now_utc());
        Ok(true)
    }

    async fn approve_job(&self, job_id: Uuid) -> Result<bool, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "approve_job");
        let job = state.jobs.get_mut(&job_id).ok_or(RepoError::NotFound)?;
        if job.status != JobStatus::Pending || job.approved {
            return Ok(false);
        }
        job.approved = true;
        Ok(true)
    }

    async fn record_error(
        &self,
        error: NewPropagationError,
    ) -> Result<PropagationErrorRecord, RepoError> {
        let record = PropagationErrorRecord {
            id: Uuid::new_v4(),
            job_id: error.job_id,
            string_id: error.string_id,
            error_type: error.error_type,
            message: error.message,
            details: error.details,
            is_resolved: false,
            created_at: OffsetDateTime::now_utc(),
            resolved_at: None,
        };
        rw_write(&self.state, SOURCE, "record_error")
            .errors
            .push(record.clone());
        Ok(record)
    }

    async fn list_errors(&self, job_id: Uuid) -> Result<Vec<PropagationErrorRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_errors")
            .errors
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_error(
        &self,
        error_id: Uuid,
    ) -> Result<Option<PropagationErrorRecord>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "find_error")
            .errors
            .iter()
            .find(|e| e.id == error_id)
            .cloned())
    }

    async fn resolve_error(&self, error_id: Uuid) -> Result<bool, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "resolve_error");
        let error = state
            .errors
            .iter_mut()
            .find(|e| e.id == error_id)
            .ok_or(RepoError::NotFound)?;
        if error.is_resolved {
            return Ok(false);
        }
        error.is_resolved = true;
        error.resolved_at = Some(OffsetDateTime::now_utc());
        Ok(true)
    }
}

#[async_trait]
impl SettingsRepo for MemoryRepositories {
    async fn load_settings(
        &self,
        workspace_id: i64,
    ) -> Result<PropagationSettingsRecord, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "load_settings")
            .settings
            .get(&workspace_id)
            .cloned()
            .unwrap_or_else(|| PropagationSettingsRecord::defaults_for(workspace_id)))
    }

    async fn save_settings(&self, settings: &PropagationSettingsRecord) -> Result<(), RepoError> {
        rw_write(&self.state, SOURCE, "save_settings")
            .settings
            .insert(settings.workspace_id, settings.clone());
        Ok(())
    }
}
