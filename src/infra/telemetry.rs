use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "redpage_cache_action_total",
            Unit::Count,
            "Requests handled by the page cache, by selected action."
        );
        describe_counter!(
            "redpage_cache_store_error_total",
            Unit::Count,
            "Store operations that failed on the request path, by operation."
        );
        describe_histogram!(
            "redpage_cache_request_ms",
            Unit::Milliseconds,
            "Time spent in the cache layer per request, origin render included."
        );
        describe_gauge!(
            "redpage_cache_event_queue_len",
            Unit::Count,
            "Current number of pending content events in the queue."
        );
        describe_histogram!(
            "redpage_cache_consume_ms",
            Unit::Milliseconds,
            "Event consumption latency in milliseconds."
        );
        describe_counter!(
            "redpage_cache_cascade_step_total",
            Unit::Count,
            "Invalidation steps applied, by step."
        );
        describe_counter!(
            "redpage_cache_event_dropped_total",
            Unit::Count,
            "Content events dropped after exhausting their attempts."
        );
    });
}
