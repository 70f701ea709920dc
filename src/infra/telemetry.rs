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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "wikimirror_jobs_total",
            Unit::Count,
            "Regeneration jobs finished, labelled by outcome."
        );
        describe_counter!(
            "wikimirror_fetch_failures_total",
            Unit::Count,
            "Regeneration jobs whose page fetch failed."
        );
        describe_histogram!(
            "wikimirror_job_ms",
            Unit::Milliseconds,
            "Wall-clock duration of one regeneration job."
        );
        describe_counter!(
            "wikimirror_orphans_removed_total",
            Unit::Count,
            "Artifacts deleted by reconciliation because no page accounts for them."
        );
        describe_gauge!(
            "wikimirror_pending_keys",
            Unit::Count,
            "Keys currently pending or executing in the regeneration scheduler."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describing_metrics_twice_is_harmless() {
        describe_metrics();
        describe_metrics();
        assert!(METRIC_DESCRIPTIONS.is_completed());
    }
}
