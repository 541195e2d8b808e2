use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::catalog::{METRIC_CATALOG_HIT, METRIC_CATALOG_MISS};
use crate::application::propagation::{
    METRIC_ITEM_RETRIES, METRIC_ITEMS_FAILED, METRIC_ITEMS_PROCESSED, METRIC_JOB_DURATION_MS,
    METRIC_JOBS_CREATED,
};
use crate::cache::METRIC_KEYS_INVALIDATED;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CATALOG_HIT,
            Unit::Count,
            "Catalog reads served from the cache store, labelled by kind."
        );
        describe_counter!(
            METRIC_CATALOG_MISS,
            Unit::Count,
            "Catalog reads that rebuilt the view, labelled by kind."
        );
        describe_counter!(
            METRIC_KEYS_INVALIDATED,
            Unit::Count,
            "Cache keys passed to delete_many by the invalidation dispatcher."
        );
        describe_counter!(
            METRIC_JOBS_CREATED,
            Unit::Count,
            "Propagation jobs created, labelled by job type and origin."
        );
        describe_counter!(
            METRIC_ITEMS_PROCESSED,
            Unit::Count,
            "Propagation items finished, labelled by outcome."
        );
        describe_counter!(
            METRIC_ITEMS_FAILED,
            Unit::Count,
            "Propagation items recorded as errors, labelled by error type."
        );
        describe_counter!(
            METRIC_ITEM_RETRIES,
            Unit::Count,
            "Item retries after transient failures."
        );
        describe_histogram!(
            METRIC_JOB_DURATION_MS,
            Unit::Milliseconds,
            "Wall time from claim to terminal status per propagation job."
        );
    });
}
