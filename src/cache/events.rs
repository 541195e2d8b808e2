//! Mutation events.
//!
//! The persistence layer reports every successful write as a [`MutationEvent`].
//! Each event carries an id for idempotent logging and a process-local epoch
//! for ordering.

use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{ChangeDescription, EntityKind, MutatedEntity, MutationOp};

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub workspace_id: i64,
    pub op: MutationOp,
    pub entity: MutatedEntity,
    pub change: ChangeDescription,
    pub timestamp: OffsetDateTime,
}

impl MutationEvent {
    pub fn entity_kind(&self) -> EntityKind {
        EntityKind::of(&self.entity)
    }
}

/// Hands out event ids and epochs.
#[derive(Debug, Default)]
pub struct EventSequencer {
    epoch_counter: AtomicU64,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn stamp(
        &self,
        workspace_id: i64,
        op: MutationOp,
        entity: MutatedEntity,
        change: ChangeDescription,
    ) -> MutationEvent {
        MutationEvent {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            workspace_id,
            op,
            entity,
            change,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}
