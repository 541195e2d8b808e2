//! Wiring of the cache, detector, dispatcher and propagation components.

use std::sync::Arc;
use std::time::Duration;

use crate::application::catalog::CatalogService;
use crate::application::propagation::{
    CancellationRegistry, JobQueue, JobRunner, PropagationService, StringRegenerator,
};
use crate::application::repos::Repositories;
use crate::cache::{
    CacheStore, ChangeDetector, ChangeTrigger, InvalidationDispatcher, RuleGenerations,
};

/// Every long-lived service of one engine instance, sharing one repository
/// handle, one cache store and one job queue.
#[derive(Clone)]
pub struct Engine {
    pub repos: Arc<dyn Repositories>,
    pub catalog: CatalogService,
    pub propagation: PropagationService,
    pub trigger: Arc<ChangeTrigger>,
    pub runner: Arc<JobRunner>,
}

impl Engine {
    pub fn build(
        repos: Arc<dyn Repositories>,
        store: Arc<dyn CacheStore>,
        cache_ttl: Duration,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let generations = Arc::new(RuleGenerations::new());
        let catalog =
            CatalogService::new(repos.clone(), store.clone(), generations.clone(), cache_ttl);
        let cancellations = Arc::new(CancellationRegistry::new());

        let propagation = PropagationService::new(repos.clone(), queue, cancellations.clone());
        let regenerator = StringRegenerator::new(repos.clone(), catalog.clone());
        let runner = Arc::new(JobRunner::new(repos.clone(), regenerator, cancellations));

        let detector = ChangeDetector::new(repos.clone());
        let dispatcher = InvalidationDispatcher::new(store, generations, propagation.clone());
        let trigger = Arc::new(ChangeTrigger::new(detector, dispatcher));

        Self {
            repos,
            catalog,
            propagation,
            trigger,
            runner,
        }
    }
}
