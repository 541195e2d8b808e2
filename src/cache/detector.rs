//! Change detection.
//!
//! Maps a mutation to the set of rules whose derived views it may have
//! changed. Relationships are always read from the repositories, never from
//! cached views, so the link data is as fresh as the mutation itself.
//! Cascading is single-hop: only rules that reference the mutated entity
//! directly are returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::application::repos::{RepoError, Repositories};
use crate::domain::types::MutatedEntity;

use super::events::MutationEvent;

#[derive(Clone)]
pub struct ChangeDetector {
    repos: Arc<dyn Repositories>,
}

impl ChangeDetector {
    pub fn new(repos: Arc<dyn Repositories>) -> Self {
        Self { repos }
    }

    /// Rule ids affected by `event`; empty when the entity has no dependents.
    pub async fn on_mutation(&self, event: &MutationEvent) -> Result<BTreeSet<i64>, RepoError> {
        let workspace_id = event.workspace_id;
        let rule_ids: Vec<i64> = match event.entity {
            MutatedEntity::Dimension { dimension_id }
            | MutatedEntity::DimensionValue { dimension_id, .. } => {
                self.repos
                    .list_rule_ids_by_dimension(workspace_id, dimension_id)
                    .await?
            }
            MutatedEntity::Rule { rule_id } | MutatedEntity::RuleDetail { rule_id } => {
                vec![rule_id]
            }
            MutatedEntity::Field { field_id } => {
                self.repos
                    .list_rule_ids_by_field(workspace_id, field_id)
                    .await?
            }
            MutatedEntity::Platform { platform_id } => {
                self.repos
                    .list_rule_ids_by_platform(workspace_id, platform_id)
                    .await?
            }
            // Strings feed no cached view.
            MutatedEntity::String { .. } => Vec::new(),
        };

        let affected: BTreeSet<i64> = rule_ids.into_iter().collect();
        debug!(
            event_id = %event.id,
            entity_kind = event.entity_kind().as_str(),
            rule_count = affected.len(),
            "Change detected"
        );
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::events::EventSequencer;
    use crate::domain::entities::{DimensionRecord, RuleDetailRecord, RuleRecord};
    use crate::domain::types::{ChangeDescription, DimensionType, MutationOp};
    use crate::infra::memory::MemoryRepositories;

    fn rule(id: i64, workspace_id: i64, platform_id: i64, details: &[(i64, i64)]) -> RuleRecord {
        RuleRecord {
            id,
            workspace_id,
            platform_id,
            name: format!("rule-{id}"),
            pattern: "{client}".to_string(),
            is_active: true,
            details: details
                .iter()
                .enumerate()
                .map(|(index, (field_id, dimension_id))| RuleDetailRecord {
                    id: id * 100 + index as i64,
                    rule_id: id,
                    field_id: *field_id,
                    dimension_id: Some(*dimension_id),
                    order: index as i32 + 1,
                    is_required: true,
                })
                .collect(),
        }
    }

    fn detector() -> ChangeDetector {
        let repos = MemoryRepositories::new();
        repos.insert_dimension(DimensionRecord {
            id: 2,
            workspace_id: 1,
            name: "region".to_string(),
            dimension_type: DimensionType::List,
        });
        repos.insert_rule(rule(5, 1, 3, &[(100, 1), (100, 2)]));
        repos.insert_rule(rule(6, 1, 4, &[(200, 2)]));
        repos.insert_rule(rule(7, 1, 3, &[(100, 1)]));
        // Same dimension id in another workspace must never leak in.
        repos.insert_rule(rule(8, 2, 3, &[(100, 2)]));
        ChangeDetector::new(Arc::new(repos))
    }

    async fn affected(detector: &ChangeDetector, entity: MutatedEntity) -> Vec<i64> {
        let event = EventSequencer::new().stamp(
            1,
            MutationOp::Update,
            entity,
            ChangeDescription::default(),
        );
        detector
            .on_mutation(&event)
            .await
            .unwrap()
            .into_iter()
            .collect()
    }

    #[tokio::test]
    async fn dimension_value_affects_rules_in_same_workspace() {
        let detector = detector();
        let entity = MutatedEntity::DimensionValue {
            dimension_value_id: 10,
            dimension_id: 2,
        };
        assert_eq!(affected(&detector, entity).await, vec![5, 6]);
        let entity = MutatedEntity::Dimension { dimension_id: 2 };
        assert_eq!(affected(&detector, entity).await, vec![5, 6]);
    }

    #[tokio::test]
    async fn rule_and_detail_affect_only_themselves() {
        let detector = detector();
        assert_eq!(
            affected(&detector, MutatedEntity::Rule { rule_id: 7 }).await,
            vec![7]
        );
        assert_eq!(
            affected(&detector, MutatedEntity::RuleDetail { rule_id: 5 }).await,
            vec![5]
        );
    }

    #[tokio::test]
    async fn field_and_platform_fan_out() {
        let detector = detector();
        assert_eq!(
            affected(&detector, MutatedEntity::Field { field_id: 100 }).await,
            vec![5, 7]
        );
        assert_eq!(
            affected(&detector, MutatedEntity::Platform { platform_id: 4 }).await,
            vec![6]
        );
    }

    #[tokio::test]
    async fn entity_without_dependents_yields_empty_set() {
        let detector = detector();
        assert!(
            affected(&detector, MutatedEntity::Dimension { dimension_id: 99 })
                .await
                .is_empty()
        );
        assert!(
            affected(&detector, MutatedEntity::String { string_id: 1 })
                .await
                .is_empty()
        );
    }
}
