// Telemetry module for structured logging and job metrics
//
// Metrics go through the `metrics` facade; the embedding application decides
// which recorder (if any) is installed.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Initialize structured logging
///
/// `RUST_LOG` overrides `log_level` when set. With `json` the output is one
/// JSON object per event, otherwise human readable lines.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, json: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, json = json, "Structured logging initialized");

    Ok(())
}

/// Register descriptions of the scheduler metrics with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        "job_success_total",
        "Total number of successful job executions"
    );
    describe_counter!("job_failed_total", "Total number of failed job executions");
    describe_histogram!(
        "job_duration_seconds",
        "Duration of job executions in seconds"
    );
    describe_gauge!("job_queue_size", "Current number of jobs in the due-queue");
}

/// Increments the job_success_total counter
#[inline]
pub fn record_job_success(job_name: &str) {
    counter!("job_success_total", "job_name" => job_name.to_string()).increment(1);
}

/// Increments the job_failed_total counter
#[inline]
pub fn record_job_failure(job_name: &str, reason: &str) {
    counter!(
        "job_failed_total",
        "job_name" => job_name.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Records the duration in the job_duration_seconds histogram
#[inline]
pub fn record_job_duration(job_name: &str, duration_seconds: f64) {
    histogram!("job_duration_seconds", "job_name" => job_name.to_string()).record(duration_seconds);
}

/// Sets the current due-queue size
#[inline]
pub fn update_queue_size(size: usize) {
    gauge!("job_queue_size").set(size as f64);
}
