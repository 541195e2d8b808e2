//! Catalog cache and change propagation triggers.
//!
//! Derived per-rule views are cached in a [`CacheStore`] under
//! `<kind>:<rule_id>`. Mutations enter through [`ChangeTrigger`], which runs
//! the [`ChangeDetector`] and the [`InvalidationDispatcher`] in order.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"   # or "postgres"
//! ttl_seconds = 1800
//! memory_capacity = 10000
//! ```

mod config;
mod detector;
mod dispatcher;
mod events;
mod generations;
mod keys;
pub(crate) mod lock;
mod store;
mod trigger;

pub use config::{CacheBackend, CacheConfig};
pub use detector::ChangeDetector;
pub use dispatcher::{Dispatched, InvalidationDispatcher, InvalidationError};
pub use events::{Epoch, EventSequencer, MutationEvent};
pub use generations::RuleGenerations;
pub use keys::{CacheKey, CatalogKind};
pub use store::{CacheError, CacheStore, MemoryCacheStore};
pub use trigger::{ChangeTrigger, InvalidationOutcome};

pub(crate) use dispatcher::METRIC_KEYS_INVALIDATED;
