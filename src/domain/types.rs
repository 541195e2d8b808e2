//! Shared domain enumerations.
//!
//! Job and error classifications are re-exported from the API types crate so
//! the persisted labels and the wire labels can never drift apart.

use serde::{Deserialize, Serialize};

pub use namewright_api_types::{
    ChangeDescription, DataImpact, JobStatus, JobType, MutatedEntity, MutationOp,
    PropagationErrorType, SourceReference, UnknownVariant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    List,
    Freetext,
}

impl DimensionType {
    pub fn as_str(self) -> &'static str {
        match self {
            DimensionType::List => "list",
            DimensionType::Freetext => "freetext",
        }
    }
}

impl TryFrom<&str> for DimensionType {
    type Error = UnknownVariant;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "list" => Ok(DimensionType::List),
            "freetext" => Ok(DimensionType::Freetext),
            other => Err(UnknownVariant {
                kind: "dimension type",
                value: other.to_string(),
            }),
        }
    }
}

/// Kind of configuration entity a mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Dimension,
    DimensionValue,
    Rule,
    RuleDetail,
    Field,
    Platform,
    String,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Dimension => "dimension",
            EntityKind::DimensionValue => "dimension_value",
            EntityKind::Rule => "rule",
            EntityKind::RuleDetail => "rule_detail",
            EntityKind::Field => "field",
            EntityKind::Platform => "platform",
            EntityKind::String => "string",
        }
    }

    pub fn of(entity: &MutatedEntity) -> Self {
        match entity {
            MutatedEntity::Dimension { .. } => EntityKind::Dimension,
            MutatedEntity::DimensionValue { .. } => EntityKind::DimensionValue,
            MutatedEntity::Rule { .. } => EntityKind::Rule,
            MutatedEntity::RuleDetail { .. } => EntityKind::RuleDetail,
            MutatedEntity::Field { .. } => EntityKind::Field,
            MutatedEntity::Platform { .. } => EntityKind::Platform,
            MutatedEntity::String { .. } => EntityKind::String,
        }
    }
}

/// Job type implied by a data-impacting change.
pub fn job_type_for_impact(impact: &DataImpact) -> JobType {
    match impact {
        DataImpact::DimensionValueChanged { .. } => JobType::DimensionValueChange,
        DataImpact::RulePatternChanged { .. } => JobType::RulePatternChange,
        DataImpact::ParentStringChanged { .. } => JobType::ParentStringChange,
    }
}

/// Minimal source reference for a data-impacting change.
pub fn source_for_impact(impact: &DataImpact) -> SourceReference {
    match impact {
        DataImpact::DimensionValueChanged {
            dimension_value_id, ..
        } => SourceReference::DimensionValue {
            dimension_value_id: *dimension_value_id,
        },
        DataImpact::RulePatternChanged { rule_id, .. } => SourceReference::Rule { rule_id: *rule_id },
        DataImpact::ParentStringChanged { string_id, .. } => SourceReference::ParentString {
            string_id: *string_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_type_roundtrips_label() {
        assert_eq!(DimensionType::try_from("list"), Ok(DimensionType::List));
        assert_eq!(
            DimensionType::try_from(DimensionType::Freetext.as_str()),
            Ok(DimensionType::Freetext)
        );
        assert!(DimensionType::try_from("tree").is_err());
    }

    #[test]
    fn impact_maps_to_job_type_and_source() {
        let impact = DataImpact::RulePatternChanged {
            rule_id: 5,
            old_pattern: "{client}-{year}".to_string(),
            new_pattern: "{year}-{client}".to_string(),
        };
        assert_eq!(job_type_for_impact(&impact), JobType::RulePatternChange);
        assert_eq!(source_for_impact(&impact), SourceReference::Rule { rule_id: 5 });
    }

    #[test]
    fn entity_kind_of_mutated_entity() {
        let entity = MutatedEntity::DimensionValue {
            dimension_value_id: 10,
            dimension_id: 2,
        };
        assert_eq!(EntityKind::of(&entity), EntityKind::DimensionValue);
        assert_eq!(EntityKind::of(&entity).as_str(), "dimension_value");
    }
}
