//! Cache-aside catalog builders.
//!
//! Each of the five derived views is read through the Cache Store under
//! `<kind>:<rule_id>`. A miss rebuilds the view from the rule's workspace
//! only and stores it with the configured TTL; a hit is returned as-is
//! without extending its lifetime. A rebuild that overlapped an invalidation
//! of the same rule is served to its caller but never left in the store.

mod views;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::repos::{RepoError, Repositories};
use crate::cache::{CacheKey, CacheStore, CatalogKind, RuleGenerations};

pub use views::{
    CompleteRuleData, DimensionCatalog, DimensionEntry, FieldTemplate, FieldTemplates,
    InheritanceLevel, InheritanceMatrix, OptimizedDimensionCatalog, RuleSnapshot, TemplateSlot,
    ValueEntry,
};

pub(crate) const METRIC_CATALOG_HIT: &str = "namewright_catalog_cache_hit_total";
pub(crate) const METRIC_CATALOG_MISS: &str = "namewright_catalog_cache_miss_total";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("rule `{rule_id}` not found")]
    RuleNotFound { rule_id: i64 },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("catalog entry could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct CatalogService {
    repos: Arc<dyn Repositories>,
    store: Arc<dyn CacheStore>,
    generations: Arc<RuleGenerations>,
    ttl: Duration,
}

/// Views built straight from the repositories, bypassing the cache.
#[derive(Debug, Clone)]
pub struct FreshRuleViews {
    pub rule_data: CompleteRuleData,
    pub values: OptimizedDimensionCatalog,
}

impl CatalogService {
    pub fn new(
        repos: Arc<dyn Repositories>,
        store: Arc<dyn CacheStore>,
        generations: Arc<RuleGenerations>,
        ttl: Duration,
    ) -> Self {
        Self {
            repos,
            store,
            generations,
            ttl,
        }
    }

    /// Read one derived view as stored JSON.
    pub async fn get(&self, kind: CatalogKind, rule_id: i64) -> Result<Value, CatalogError> {
        let key = CacheKey::new(kind, rule_id).render();

        match self.store.get(&key).await {
            Ok(Some(value)) => {
                counter!(METRIC_CATALOG_HIT, "kind" => kind.as_str()).increment(1);
                return Ok(value);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = "namewright::application::catalog",
                    key = %key,
                    error = %err,
                    "Cache read failed; rebuilding"
                );
            }
        }
        counter!(METRIC_CATALOG_MISS, "kind" => kind.as_str()).increment(1);

        let generation = self.generations.current(rule_id);
        let snapshot = self.load_snapshot(rule_id).await?;
        let value = match kind {
            CatalogKind::DimensionCatalog => encode(views::build_dimension_catalog(&snapshot))?,
            CatalogKind::OptimizedDimensionCatalog => {
                encode(views::build_optimized_dimension_catalog(&snapshot))?
            }
            CatalogKind::CompleteRuleData => encode(views::build_complete_rule_data(&snapshot))?,
            CatalogKind::FieldTemplates => encode(views::build_field_templates(&snapshot))?,
            CatalogKind::InheritanceMatrix => encode(views::build_inheritance_matrix(&snapshot))?,
        };

        if self.generations.current(rule_id) != generation {
            debug!(key = %key, "Rule invalidated during rebuild; entry not cached");
            return Ok(value);
        }

        if let Err(err) = self.store.set(&key, value.clone(), self.ttl).await {
            warn!(
                target = "namewright::application::catalog",
                key = %key,
                error = %err,
                "Cache write failed; serving uncached value"
            );
        } else if self.generations.current(rule_id) != generation {
            // The invalidation landed between the check and the write.
            if let Err(err) = self.store.delete_many(std::slice::from_ref(&key)).await {
                warn!(
                    target = "namewright::application::catalog",
                    key = %key,
                    error = %err,
                    "Failed to drop entry built before an invalidation"
                );
            }
        } else {
            debug!(key = %key, "Catalog entry populated");
        }

        Ok(value)
    }

    /// Rule data and current dimension values read from the repositories,
    /// never from the cache.
    pub async fn load_fresh(&self, rule_id: i64) -> Result<FreshRuleViews, CatalogError> {
        let snapshot = self.load_snapshot(rule_id).await?;
        Ok(FreshRuleViews {
            rule_data: views::build_complete_rule_data(&snapshot),
            values: views::build_optimized_dimension_catalog(&snapshot),
        })
    }

    pub async fn dimension_catalog(&self, rule_id: i64) -> Result<DimensionCatalog, CatalogError> {
        self.typed(CatalogKind::DimensionCatalog, rule_id).await
    }

    pub async fn optimized_dimension_catalog(
        &self,
        rule_id: i64,
    ) -> Result<OptimizedDimensionCatalog, CatalogError> {
        self.typed(CatalogKind::OptimizedDimensionCatalog, rule_id)
            .await
    }

    pub async fn complete_rule_data(&self, rule_id: i64) -> Result<CompleteRuleData, CatalogError> {
        self.typed(CatalogKind::CompleteRuleData, rule_id).await
    }

    pub async fn field_templates(&self, rule_id: i64) -> Result<FieldTemplates, CatalogError> {
        self.typed(CatalogKind::FieldTemplates, rule_id).await
    }

    pub async fn inheritance_matrix(
        &self,
        rule_id: i64,
    ) -> Result<InheritanceMatrix, CatalogError> {
        self.typed(CatalogKind::InheritanceMatrix, rule_id).await
    }

    async fn typed<T: DeserializeOwned>(
        &self,
        kind: CatalogKind,
        rule_id: i64,
    ) -> Result<T, CatalogError> {
        let value = self.get(kind, rule_id).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn load_snapshot(&self, rule_id: i64) -> Result<RuleSnapshot, CatalogError> {
        let rule = self
            .repos
            .find_rule(rule_id)
            .await?
            .ok_or(CatalogError::RuleNotFound { rule_id })?;

        let workspace_id = rule.workspace_id;
        let dimension_ids = rule.dimension_ids();
        let platform = self.repos.find_platform(rule.platform_id).await?;
        let fields = self.repos.list_fields(&rule.field_ids()).await?;
        let dimensions = self
            .repos
            .list_dimensions(workspace_id, &dimension_ids)
            .await?;
        let values = self
            .repos
            .list_dimension_values(workspace_id, &dimension_ids)
            .await?;

        Ok(RuleSnapshot {
            rule,
            platform,
            fields,
            dimensions,
            values,
        })
    }
}

fn encode(view: impl Serialize) -> Result<Value, CatalogError> {
    Ok(serde_json::to_value(view)?)
}
