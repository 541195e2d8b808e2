//! Invalidation dispatcher.
//!
//! Clears every cached view of the affected rules and, for data-impacting
//! changes, asks the propagation engine for a job. The rules' generations
//! are advanced before their keys are deleted, and both happen before the
//! job is created, so a rebuild that raced the mutation cannot put a
//! pre-change view back.

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::info;

use crate::application::propagation::{PropagationService, PropagationServiceError};
use crate::application::repos::RepoError;
use crate::domain::entities::PropagationJobRecord;
use crate::domain::types::ChangeDescription;

use super::events::Epoch;
use super::generations::RuleGenerations;
use super::keys::CacheKey;
use super::store::{CacheError, CacheStore};

pub(crate) const METRIC_KEYS_INVALIDATED: &str = "namewright_cache_keys_invalidated_total";

#[derive(Debug, Error)]
pub enum InvalidationError {
    #[error("change detection failed: {0}")]
    Detection(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Propagation(#[from] PropagationServiceError),
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub keys_deleted: usize,
    pub job: Option<PropagationJobRecord>,
}

#[derive(Clone)]
pub struct InvalidationDispatcher {
    store: Arc<dyn CacheStore>,
    generations: Arc<RuleGenerations>,
    propagation: PropagationService,
}

impl InvalidationDispatcher {
    pub fn new(
        store: Arc<dyn CacheStore>,
        generations: Arc<RuleGenerations>,
        propagation: PropagationService,
    ) -> Self {
        Self {
            store,
            generations,
            propagation,
        }
    }

    pub async fn invalidate(
        &self,
        workspace_id: i64,
        rule_ids: &BTreeSet<i64>,
        epoch: Epoch,
        change: &ChangeDescription,
    ) -> Result<Dispatched, InvalidationError> {
        self.generations.advance(rule_ids, epoch);

        let keys: Vec<String> = rule_ids
            .iter()
            .flat_map(|rule_id| CacheKey::family(*rule_id))
            .map(|key| key.render())
            .collect();

        let keys_deleted = if keys.is_empty() {
            0
        } else {
            self.store.delete_many(&keys).await?
        };
        counter!(METRIC_KEYS_INVALIDATED).increment(keys.len() as u64);

        let job = match &change.impact {
            Some(impact) => {
                self.propagation
                    .create_for_change(workspace_id, impact, &change.summary)
                    .await
            }
            None => Ok(None),
        };

        info!(
            workspace_id,
            epoch,
            rule_count = rule_ids.len(),
            keys_deleted,
            change = %change.summary,
            data_impacting = change.impact.is_some(),
            job_id = ?job.as_ref().ok().and_then(|job| job.as_ref().map(|j| j.id)),
            "Cache invalidated"
        );

        Ok(Dispatched {
            keys_deleted,
            job: job?,
        })
    }
}
