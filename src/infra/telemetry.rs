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
            "kvgate_cache_refresh_total",
            Unit::Count,
            "Refresh cycles per prefix, labelled by outcome."
        );
        describe_counter!(
            "kvgate_cache_fetch_failures_total",
            Unit::Count,
            "Per-key value fetches skipped during a refresh cycle."
        );
        describe_histogram!(
            "kvgate_cache_refresh_ms",
            Unit::Milliseconds,
            "Duration of a refresh cycle in milliseconds."
        );
        describe_gauge!(
            "kvgate_cache_snapshot_entries",
            Unit::Count,
            "Entries in the most recently installed snapshot."
        );
        describe_counter!(
            "kvgate_query_malformed_total",
            Unit::Count,
            "Records dropped by query filtering because they were not JSON objects."
        );
    });
}
