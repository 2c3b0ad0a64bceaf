use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

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

const COUNTERS: &[(&str, &str)] = &[
    (
        "offgrid_request_total",
        "Requests served, labelled by class and response source.",
    ),
    (
        "offgrid_network_failure_total",
        "Network fetches that failed or timed out, by request class.",
    ),
    (
        "offgrid_cache_miss_total",
        "Requests that failed offline with no cached copy, by request class.",
    ),
    (
        "offgrid_cache_evict_total",
        "Runtime media entries removed by the eviction bound.",
    ),
    (
        "offgrid_background_failure_total",
        "Background cache tasks that failed, by task.",
    ),
    (
        "offgrid_namespace_removed_total",
        "Stale namespaces destroyed during activation.",
    ),
];

/// Register descriptions for every metric the engine emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for (name, description) in COUNTERS {
            describe_counter!(*name, Unit::Count, *description);
        }
        describe_histogram!(
            "offgrid_warmup_ms",
            Unit::Milliseconds,
            "Precache warm-up latency in milliseconds."
        );
    });
}
