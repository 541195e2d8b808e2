//! Derived per-rule views and their builders.
//!
//! Builders are pure: they take already-loaded, workspace-scoped rows and
//! shape them. Loading happens in [`super::CatalogService`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::entities::{
    DimensionRecord, DimensionValueRecord, FieldRecord, PlatformRecord, RuleRecord,
};
use crate::domain::types::DimensionType;

/// Rows a builder may read, all belonging to the rule's workspace.
#[derive(Debug, Clone)]
pub struct RuleSnapshot {
    pub rule: RuleRecord,
    pub platform: Option<PlatformRecord>,
    pub fields: Vec<FieldRecord>,
    pub dimensions: Vec<DimensionRecord>,
    pub values: Vec<DimensionValueRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub id: i64,
    pub dimension_id: i64,
    pub value: String,
    pub label: String,
}

impl From<&DimensionValueRecord> for ValueEntry {
    fn from(record: &DimensionValueRecord) -> Self {
        Self {
            id: record.id,
            dimension_id: record.dimension_id,
            value: record.value.clone(),
            label: record.label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionEntry {
    pub id: i64,
    pub name: String,
    pub dimension_type: DimensionType,
    pub values: Vec<ValueEntry>,
}

/// Dimensions used by a rule with their allowed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionCatalog {
    pub rule_id: i64,
    pub workspace_id: i64,
    pub dimensions: Vec<DimensionEntry>,
}

/// Lookup tables over the same data as [`DimensionCatalog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizedDimensionCatalog {
    pub rule_id: i64,
    pub dimension_id_by_name: BTreeMap<String, i64>,
    pub value_by_id: BTreeMap<i64, ValueEntry>,
    pub value_ids_by_dimension: BTreeMap<i64, Vec<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRuleData {
    pub rule: RuleRecord,
    pub platform: Option<PlatformRecord>,
    pub fields: Vec<FieldRecord>,
    pub dimensions: Vec<DimensionRecord>,
}

impl CompleteRuleData {
    pub fn dimension_by_name(&self, name: &str) -> Option<&DimensionRecord> {
        self.dimensions.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub order: i32,
    pub dimension_id: Option<i64>,
    pub dimension_name: Option<String>,
    pub is_required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub field_id: i64,
    pub field_name: String,
    pub level: i32,
    pub slots: Vec<TemplateSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTemplates {
    pub rule_id: i64,
    pub pattern: String,
    pub templates: Vec<FieldTemplate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceLevel {
    pub field_id: i64,
    pub level: i32,
    pub parent_field_id: Option<i64>,
    /// Dimensions also present on the parent field level.
    pub inherited_dimension_ids: Vec<i64>,
    /// Dimensions introduced at this level.
    pub own_dimension_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceMatrix {
    pub rule_id: i64,
    pub levels: Vec<InheritanceLevel>,
}

pub fn build_dimension_catalog(snapshot: &RuleSnapshot) -> DimensionCatalog {
    let dimensions = snapshot
        .dimensions
        .iter()
        .map(|dimension| DimensionEntry {
            id: dimension.id,
            name: dimension.name.clone(),
            dimension_type: dimension.dimension_type,
            values: snapshot
                .values
                .iter()
                .filter(|value| value.dimension_id == dimension.id)
                .map(ValueEntry::from)
                .collect(),
        })
        .collect();

    DimensionCatalog {
        rule_id: snapshot.rule.id,
        workspace_id: snapshot.rule.workspace_id,
        dimensions,
    }
}

pub fn build_optimized_dimension_catalog(snapshot: &RuleSnapshot) -> OptimizedDimensionCatalog {
    let dimension_id_by_name = snapshot
        .dimensions
        .iter()
        .map(|d| (d.name.clone(), d.id))
        .collect();

    let mut value_by_id = BTreeMap::new();
    let mut value_ids_by_dimension: BTreeMap<i64, Vec<i64>> = snapshot
        .dimensions
        .iter()
        .map(|d| (d.id, Vec::new()))
        .collect();
    for value in &snapshot.values {
        value_by_id.insert(value.id, ValueEntry::from(value));
        value_ids_by_dimension
            .entry(value.dimension_id)
            .or_default()
            .push(value.id);
    }

    OptimizedDimensionCatalog {
        rule_id: snapshot.rule.id,
        dimension_id_by_name,
        value_by_id,
        value_ids_by_dimension,
    }
}

pub fn build_complete_rule_data(snapshot: &RuleSnapshot) -> CompleteRuleData {
    CompleteRuleData {
        rule: snapshot.rule.clone(),
        platform: snapshot.platform.clone(),
        fields: snapshot.fields.clone(),
        dimensions: snapshot.dimensions.clone(),
    }
}

pub fn build_field_templates(snapshot: &RuleSnapshot) -> FieldTemplates {
    let dimension_name = |id: i64| {
        snapshot
            .dimensions
            .iter()
            .find(|d| d.id == id)
            .map(|d| d.name.clone())
    };

    let templates = sorted_fields(snapshot)
        .into_iter()
        .map(|field| {
            let mut slots: Vec<TemplateSlot> = snapshot
                .rule
                .details
                .iter()
                .filter(|detail| detail.field_id == field.id)
                .map(|detail| TemplateSlot {
                    order: detail.order,
                    dimension_id: detail.dimension_id,
                    dimension_name: detail.dimension_id.and_then(dimension_name),
                    is_required: detail.is_required,
                })
                .collect();
            slots.sort_by_key(|slot| slot.order);
            FieldTemplate {
                field_id: field.id,
                field_name: field.name.clone(),
                level: field.level,
                slots,
            }
        })
        .collect();

    FieldTemplates {
        rule_id: snapshot.rule.id,
        pattern: snapshot.rule.pattern.clone(),
        templates,
    }
}

pub fn build_inheritance_matrix(snapshot: &RuleSnapshot) -> InheritanceMatrix {
    let dimensions_of = |field_id: i64| -> Vec<i64> {
        let mut ids: Vec<i64> = snapshot
            .rule
            .details
            .iter()
            .filter(|d| d.field_id == field_id)
            .filter_map(|d| d.dimension_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };

    let levels = sorted_fields(snapshot)
        .into_iter()
        .map(|field| {
            let parent_field_id = snapshot
                .fields
                .iter()
                .find(|candidate| candidate.next_field_id == Some(field.id))
                .map(|parent| parent.id);
            let parent_dimensions = parent_field_id.map(dimensions_of).unwrap_or_default();
            let (inherited_dimension_ids, own_dimension_ids) = dimensions_of(field.id)
                .into_iter()
                .partition(|id| parent_dimensions.contains(id));
            InheritanceLevel {
                field_id: field.id,
                level: field.level,
                parent_field_id,
                inherited_dimension_ids,
                own_dimension_ids,
            }
        })
        .collect();

    InheritanceMatrix {
        rule_id: snapshot.rule.id,
        levels,
    }
}

fn sorted_fields(snapshot: &RuleSnapshot) -> Vec<&FieldRecord> {
    let mut fields: Vec<&FieldRecord> = snapshot.fields.iter().collect();
    fields.sort_by_key(|f| (f.level, f.id));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::RuleDetailRecord;

    fn snapshot() -> RuleSnapshot {
        let detail = |id, field_id, dimension_id: i64, order, is_required| RuleDetailRecord {
            id,
            rule_id: 5,
            field_id,
            dimension_id: Some(dimension_id),
            order,
            is_required,
        };
        let dimension = |id, name: &str| DimensionRecord {
            id,
            workspace_id: 1,
            name: name.to_string(),
            dimension_type: DimensionType::List,
        };
        let value = |id, dimension_id, value: &str| DimensionValueRecord {
            id,
            workspace_id: 1,
            dimension_id,
            value: value.to_string(),
            label: value.to_lowercase(),
        };
        RuleSnapshot {
            rule: RuleRecord {
                id: 5,
                workspace_id: 1,
                platform_id: 3,
                name: "campaigns".to_string(),
                pattern: "{client}-{year}-{region}".to_string(),
                is_active: true,
                details: vec![
                    detail(1, 100, 1, 1, true),
                    detail(2, 100, 2, 2, true),
                    detail(3, 101, 1, 1, true),
                    detail(4, 101, 2, 2, true),
                    detail(5, 101, 3, 3, false),
                ],
            },
            platform: Some(PlatformRecord {
                id: 3,
                name: "Search".to_string(),
                slug: "search".to_string(),
            }),
            fields: vec![
                FieldRecord {
                    id: 101,
                    platform_id: 3,
                    name: "ad_group".to_string(),
                    level: 2,
                    next_field_id: None,
                },
                FieldRecord {
                    id: 100,
                    platform_id: 3,
                    name: "campaign".to_string(),
                    level: 1,
                    next_field_id: Some(101),
                },
            ],
            dimensions: vec![
                dimension(1, "client"),
                dimension(2, "year"),
                dimension(3, "region"),
            ],
            values: vec![
                value(10, 3, "US"),
                value(11, 3, "EU"),
                value(20, 1, "ACME"),
            ],
        }
    }

    #[test]
    fn dimension_catalog_groups_values() {
        let catalog = build_dimension_catalog(&snapshot());
        assert_eq!(catalog.rule_id, 5);
        let region = catalog
            .dimensions
            .iter()
            .find(|d| d.name == "region")
            .expect("region present");
        let values: Vec<&str> = region.values.iter().map(|v| v.value.as_str()).collect();
        assert_eq!(values, vec!["US", "EU"]);
        let year = catalog.dimensions.iter().find(|d| d.name == "year").unwrap();
        assert!(year.values.is_empty());
    }

    #[test]
    fn optimized_catalog_indexes_by_id_and_name() {
        let catalog = build_optimized_dimension_catalog(&snapshot());
        assert_eq!(catalog.dimension_id_by_name.get("region"), Some(&3));
        assert_eq!(catalog.value_by_id.get(&10).map(|v| v.value.as_str()), Some("US"));
        assert_eq!(catalog.value_ids_by_dimension.get(&3), Some(&vec![10, 11]));
        assert_eq!(catalog.value_ids_by_dimension.get(&2), Some(&vec![]));
    }

    #[test]
    fn field_templates_follow_level_and_order() {
        let templates = build_field_templates(&snapshot());
        let fields: Vec<i64> = templates.templates.iter().map(|t| t.field_id).collect();
        assert_eq!(fields, vec![100, 101]);
        let ad_group = &templates.templates[1];
        let names: Vec<Option<&str>> = ad_group
            .slots
            .iter()
            .map(|s| s.dimension_name.as_deref())
            .collect();
        assert_eq!(names, vec![Some("client"), Some("year"), Some("region")]);
        assert!(!ad_group.slots[2].is_required);
    }

    #[test]
    fn inheritance_matrix_splits_shared_dimensions() {
        let matrix = build_inheritance_matrix(&snapshot());
        assert_eq!(matrix.levels.len(), 2);
        let top = &matrix.levels[0];
        assert_eq!(top.parent_field_id, None);
        assert!(top.inherited_dimension_ids.is_empty());
        assert_eq!(top.own_dimension_ids, vec![1, 2]);

        let child = &matrix.levels[1];
        assert_eq!(child.parent_field_id, Some(100));
        assert_eq!(child.inherited_dimension_ids, vec![1, 2]);
        assert_eq!(child.own_dimension_ids, vec![3]);
    }
}
