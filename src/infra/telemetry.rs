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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "rendergate_artifact_fresh_total",
            Unit::Count,
            "Template requests served from an up-to-date prebuilt artifact."
        );
        describe_counter!(
            "rendergate_artifact_stale_total",
            Unit::Count,
            "Template requests whose artifact was missing or older than its source."
        );
        describe_counter!(
            "rendergate_render_total",
            Unit::Count,
            "Total number of render engine invocations."
        );
        describe_counter!(
            "rendergate_render_failure_total",
            Unit::Count,
            "Render engine invocations that produced no usable output."
        );
        describe_histogram!(
            "rendergate_render_ms",
            Unit::Milliseconds,
            "Render latency in milliseconds, including time spent waiting for a permit."
        );
        describe_counter!(
            "rendergate_upload_cleanup_failure_total",
            Unit::Count,
            "Staged uploads or batch directories that could not be removed."
        );
        describe_counter!(
            "rendergate_path_traversal_total",
            Unit::Count,
            "Client identifiers rejected for escaping their root directory."
        );
    });
}
