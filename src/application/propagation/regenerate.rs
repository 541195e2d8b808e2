//! Single-string regeneration.
//!
//! A string's value is re-derived from its rule's current pattern and the
//! current values behind its details, read from the repositories rather than
//! the catalog cache. Slots the string does not fill itself are inherited
//! from the closest ancestor that does. Writes go through the repository's
//! compare-and-set so concurrent editors surface as conflicts.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::application::catalog::{
    CatalogError, CatalogService, FreshRuleViews, OptimizedDimensionCatalog,
};
use crate::application::repos::{RepoError, Repositories};
use crate::domain::entities::{StringDetailRecord, StringRecord};
use crate::domain::pattern::RulePattern;
use crate::domain::types::PropagationErrorType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Regeneration {
    Unchanged,
    Updated { old_value: String, new_value: String },
}

/// Why one string could not be regenerated.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub error_type: PropagationErrorType,
    pub message: String,
    pub details: Value,
}

impl ItemFailure {
    pub fn new(error_type: PropagationErrorType, message: impl Into<String>, details: Value) -> Self {
        Self {
            error_type,
            message: message.into(),
            details,
        }
    }

    fn configuration(message: impl Into<String>, details: Value) -> Self {
        Self::new(PropagationErrorType::ConfigurationError, message, details)
    }

    fn from_repo(err: RepoError) -> Self {
        match err {
            err if err.is_transient() => Self::new(
                PropagationErrorType::LockContention,
                err.to_string(),
                json!({ "cause": "transient" }),
            ),
            RepoError::Duplicate { constraint } => Self::new(
                PropagationErrorType::UniquenessConflict,
                "regenerated value is already taken",
                json!({ "constraint": constraint }),
            ),
            other => Self::new(
                PropagationErrorType::SystemError,
                other.to_string(),
                Value::Null,
            ),
        }
    }

    fn from_catalog(err: CatalogError) -> Self {
        match err {
            CatalogError::RuleNotFound { rule_id } => Self::configuration(
                format!("rule `{rule_id}` no longer exists"),
                json!({ "rule_id": rule_id }),
            ),
            CatalogError::Repo(err) => Self::from_repo(err),
            other => Self::new(
                PropagationErrorType::SystemError,
                other.to_string(),
                Value::Null,
            ),
        }
    }

    /// Failure recorded for a target whose ancestor hit a configuration error.
    pub fn subtree_aborted(ancestor_id: i64, cause: &ItemFailure) -> Self {
        Self::configuration(
            format!("ancestor string `{ancestor_id}` failed: {}", cause.message),
            json!({ "ancestor_string_id": ancestor_id }),
        )
    }

    pub fn is_transient(&self) -> bool {
        self.error_type == PropagationErrorType::LockContention
    }

    pub fn aborts_subtree(&self) -> bool {
        self.error_type == PropagationErrorType::ConfigurationError
    }
}

#[derive(Clone)]
pub struct StringRegenerator {
    repos: Arc<dyn Repositories>,
    catalog: CatalogService,
}

impl StringRegenerator {
    pub fn new(repos: Arc<dyn Repositories>, catalog: CatalogService) -> Self {
        Self { repos, catalog }
    }

    pub async fn regenerate(&self, string_id: i64) -> Result<Regeneration, ItemFailure> {
        let string = self
            .repos
            .find_string(string_id)
            .await
            .map_err(ItemFailure::from_repo)?
            .ok_or_else(|| {
                ItemFailure::new(
                    PropagationErrorType::EntityMismatch,
                    format!("string `{string_id}` no longer exists"),
                    json!({ "string_id": string_id }),
                )
            })?;

        let FreshRuleViews { rule_data, values } = self
            .catalog
            .load_fresh(string.rule_id)
            .await
            .map_err(ItemFailure::from_catalog)?;
        let rule = &rule_data.rule;

        if rule.workspace_id != string.workspace_id {
            return Err(ItemFailure::new(
                PropagationErrorType::EntityMismatch,
                format!(
                    "rule `{}` belongs to workspace {}, string to {}",
                    rule.id, rule.workspace_id, string.workspace_id
                ),
                json!({ "rule_id": rule.id }),
            ));
        }
        if !rule.is_active {
            return Err(ItemFailure::configuration(
                format!("rule `{}` is inactive", rule.id),
                json!({ "rule_id": rule.id }),
            ));
        }
        if !rule.field_ids().contains(&string.field_id) {
            return Err(ItemFailure::new(
                PropagationErrorType::EntityMismatch,
                format!("field `{}` is not part of rule `{}`", string.field_id, rule.id),
                json!({ "rule_id": rule.id, "field_id": string.field_id }),
            ));
        }

        let pattern = RulePattern::parse(&rule.pattern).map_err(|err| {
            ItemFailure::configuration(err.to_string(), json!({ "pattern": rule.pattern }))
        })?;
        let own_details = self
            .repos
            .list_details(string.id)
            .await
            .map_err(ItemFailure::from_repo)?;

        let mut slots = BTreeMap::new();
        for name in pattern.placeholders() {
            let dimension = rule_data.dimension_by_name(name).ok_or_else(|| {
                ItemFailure::configuration(
                    format!("placeholder `{name}` matches no dimension of rule `{}`", rule.id),
                    json!({ "placeholder": name }),
                )
            })?;

            let resolved = match own_details.iter().find(|d| d.dimension_id == dimension.id) {
                Some(detail) => self.detail_value(&string, detail, &values).await?,
                None => self.inherited_value(&string, dimension.id, &values).await?,
            };

            let value = match resolved {
                Some(value) => value,
                None => {
                    let required = rule
                        .detail_for(string.field_id, dimension.id)
                        .is_some_and(|detail| detail.is_required);
                    if required {
                        return Err(ItemFailure::new(
                            PropagationErrorType::RequiredDimensionMissing,
                            format!("no value for required dimension `{}`", dimension.name),
                            json!({ "dimension_id": dimension.id }),
                        ));
                    }
                    String::new()
                }
            };
            slots.insert(name.to_string(), value);
        }

        let new_value = pattern.render(&slots).map_err(|name| {
            ItemFailure::new(
                PropagationErrorType::SystemError,
                format!("placeholder `{name}` left unresolved"),
                Value::Null,
            )
        })?;

        if new_value == string.value {
            return Ok(Regeneration::Unchanged);
        }

        let holder = self
            .repos
            .find_by_value(string.workspace_id, string.rule_id, string.field_id, &new_value)
            .await
            .map_err(ItemFailure::from_repo)?;
        if let Some(other_id) = holder
            && other_id != string.id
        {
            return Err(ItemFailure::new(
                PropagationErrorType::UniquenessConflict,
                format!("value `{new_value}` is already used by string `{other_id}`"),
                json!({ "conflicting_string_id": other_id, "value": new_value }),
            ));
        }

        self.repos
            .update_string_value(string.id, string.version, &new_value)
            .await
            .map_err(ItemFailure::from_repo)?;

        Ok(Regeneration::Updated {
            old_value: string.value,
            new_value,
        })
    }

    async fn inherited_value(
        &self,
        string: &StringRecord,
        dimension_id: i64,
        values: &OptimizedDimensionCatalog,
    ) -> Result<Option<String>, ItemFailure> {
        let mut seen = HashSet::from([string.id]);
        let mut next = string.parent_id;

        while let Some(parent_id) = next {
            if !seen.insert(parent_id) {
                break;
            }
            let Some(parent) = self
                .repos
                .find_string(parent_id)
                .await
                .map_err(ItemFailure::from_repo)?
            else {
                break;
            };
            if parent.workspace_id != string.workspace_id {
                return Err(ItemFailure::new(
                    PropagationErrorType::EntityMismatch,
                    format!("parent string `{parent_id}` belongs to another workspace"),
                    json!({ "parent_string_id": parent_id }),
                ));
            }
            let details = self
                .repos
                .list_details(parent.id)
                .await
                .map_err(ItemFailure::from_repo)?;
            if let Some(detail) = details.iter().find(|d| d.dimension_id == dimension_id) {
                return self.detail_value(&parent, detail, values).await;
            }
            next = parent.parent_id;
        }

        Ok(None)
    }

    async fn detail_value(
        &self,
        owner: &StringRecord,
        detail: &StringDetailRecord,
        values: &OptimizedDimensionCatalog,
    ) -> Result<Option<String>, ItemFailure> {
        let Some(value_id) = detail.dimension_value_id else {
            return Ok(detail.freetext.clone().filter(|text| !text.is_empty()));
        };

        let invalid = |reason: &str| {
            ItemFailure::new(
                PropagationErrorType::InvalidDimensionValue,
                format!("dimension value `{value_id}` {reason}"),
                json!({
                    "string_id": owner.id,
                    "dimension_id": detail.dimension_id,
                    "dimension_value_id": value_id,
                }),
            )
        };

        if let Some(entry) = values.value_by_id.get(&value_id) {
            if entry.dimension_id != detail.dimension_id {
                return Err(invalid("belongs to another dimension"));
            }
            return Ok(Some(entry.value.clone()));
        }

        match self
            .repos
            .find_dimension_value(value_id)
            .await
            .map_err(ItemFailure::from_repo)?
        {
            None => Err(invalid("no longer exists")),
            Some(value) if value.workspace_id != owner.workspace_id => Err(ItemFailure::new(
                PropagationErrorType::EntityMismatch,
                format!("dimension value `{value_id}` belongs to another workspace"),
                json!({ "dimension_value_id": value_id }),
            )),
            Some(value) if value.dimension_id != detail.dimension_id => {
                Err(invalid("belongs to another dimension"))
            }
            Some(value) => Ok(Some(value.value)),
        }
    }
}
