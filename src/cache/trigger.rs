//! Change trigger.
//!
//! The single entry point the persistence layer calls after a successful
//! mutation. Detection and invalidation run synchronously so the caller
//! returns only once stale views are gone.

use uuid::Uuid;

use crate::domain::entities::{DimensionValueRecord, PropagationJobRecord, RuleRecord, StringRecord};
use crate::domain::types::{ChangeDescription, DataImpact, MutatedEntity, MutationOp};

use super::detector::ChangeDetector;
use super::dispatcher::{InvalidationDispatcher, InvalidationError};
use super::events::{Epoch, EventSequencer};

#[derive(Debug, Clone)]
pub struct InvalidationOutcome {
    pub event_id: Uuid,
    pub epoch: Epoch,
    pub affected_rules: Vec<i64>,
    pub keys_deleted: usize,
    pub job: Option<PropagationJobRecord>,
}

/// Change trigger for persistence-layer mutations.
///
/// # Usage
///
/// ```ignore
/// // After a successful dimension value update:
/// trigger.dimension_value_updated(&before, &after).await?;
/// ```
pub struct ChangeTrigger {
    sequencer: EventSequencer,
    detector: ChangeDetector,
    dispatcher: InvalidationDispatcher,
}

impl ChangeTrigger {
    pub fn new(detector: ChangeDetector, dispatcher: InvalidationDispatcher) -> Self {
        Self {
            sequencer: EventSequencer::new(),
            detector,
            dispatcher,
        }
    }

    pub async fn record(
        &self,
        workspace_id: i64,
        op: MutationOp,
        entity: MutatedEntity,
        change: ChangeDescription,
    ) -> Result<InvalidationOutcome, InvalidationError> {
        let event = self.sequencer.stamp(workspace_id, op, entity, change);
        let affected = self.detector.on_mutation(&event).await?;
        let dispatched = self
            .dispatcher
            .invalidate(event.workspace_id, &affected, event.epoch, &event.change)
            .await?;

        Ok(InvalidationOutcome {
            event_id: event.id,
            epoch: event.epoch,
            affected_rules: affected.into_iter().collect(),
            keys_deleted: dispatched.keys_deleted,
            job: dispatched.job,
        })
    }

    /// A value or label change is data-impacting.
    pub async fn dimension_value_updated(
        &self,
        before: &DimensionValueRecord,
        after: &DimensionValueRecord,
    ) -> Result<InvalidationOutcome, InvalidationError> {
        let impact = (before.value != after.value || before.label != after.label).then(|| {
            DataImpact::DimensionValueChanged {
                dimension_value_id: after.id,
                old_value: before.value.clone(),
                new_value: after.value.clone(),
            }
        });
        let change = ChangeDescription {
            summary: format!(
                "dimension value {} changed from `{}` to `{}`",
                after.id, before.value, after.value
            ),
            impact,
        };
        self.record(
            after.workspace_id,
            MutationOp::Update,
            MutatedEntity::DimensionValue {
                dimension_value_id: after.id,
                dimension_id: after.dimension_id,
            },
            change,
        )
        .await
    }

    /// A pattern change is data-impacting; other rule edits only invalidate.
    pub async fn rule_updated(
        &self,
        before: &RuleRecord,
        after: &RuleRecord,
    ) -> Result<InvalidationOutcome, InvalidationError> {
        let impact = (before.pattern != after.pattern).then(|| DataImpact::RulePatternChanged {
            rule_id: after.id,
            old_pattern: before.pattern.clone(),
            new_pattern: after.pattern.clone(),
        });
        let summary = match &impact {
            Some(_) => format!(
                "rule {} pattern changed from `{}` to `{}`",
                after.id, before.pattern, after.pattern
            ),
            None => format!("rule {} updated", after.id),
        };
        self.record(
            after.workspace_id,
            MutationOp::Update,
            MutatedEntity::Rule { rule_id: after.id },
            ChangeDescription { summary, impact },
        )
        .await
    }

    /// Strings have no cached views; a changed value only propagates to descendants.
    pub async fn string_updated(
        &self,
        before: &StringRecord,
        after: &StringRecord,
    ) -> Result<InvalidationOutcome, InvalidationError> {
        let impact = (before.value != after.value).then(|| DataImpact::ParentStringChanged {
            string_id: after.id,
            old_value: before.value.clone(),
            new_value: after.value.clone(),
        });
        let change = ChangeDescription {
            summary: format!(
                "string {} changed from `{}` to `{}`",
                after.id, before.value, after.value
            ),
            impact,
        };
        self.record(
            after.workspace_id,
            MutationOp::Update,
            MutatedEntity::String {
                string_id: after.id,
            },
            change,
        )
        .await
    }
}
