use std::sync::Once;

use metrics::{Unit, describe_counter};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TelemetryError(String);

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
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
        .map_err(|err| TelemetryError(err.to_string()))
}

/// Register descriptions for the counters repository sessions emit.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quarry_cache_hit_total",
            Unit::Count,
            "Cacheable reads served from the cache store, by method."
        );
        describe_counter!(
            "quarry_cache_miss_total",
            Unit::Count,
            "Cacheable reads that went to the engine, by method."
        );
        describe_counter!(
            "quarry_cache_evict_total",
            Unit::Count,
            "Cached reads evicted from the memory store for capacity."
        );
        describe_counter!(
            "quarry_cache_invalidation_failure_total",
            Unit::Count,
            "Cache keys the invalidator failed to forget."
        );
        describe_counter!(
            "quarry_lifecycle_event_total",
            Unit::Count,
            "Lifecycle events published, by action."
        );
    });
}
