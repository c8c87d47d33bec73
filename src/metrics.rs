//! Prometheus metrics for upstream latency and pipeline health.
//!
//! Recorded through the `metrics` facade; nothing is exported until
//! [`install_prometheus`] installs a recorder (the `serve` command does).

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::debug;

// === Metric Name Constants ===

/// HTTP request latency metric name.
pub const METRIC_HTTP_REQUEST_LATENCY: &str = "kalshi_http_request_latency_ms";
/// Signing latency metric name.
pub const METRIC_SIGNING_LATENCY: &str = "kalshi_signing_latency_ms";
/// Window fetch latency metric name.
pub const METRIC_WINDOW_FETCH_LATENCY: &str = "window_fetch_latency_ms";
/// Pages fetched counter metric name.
pub const METRIC_PAGES_FETCHED: &str = "pages_fetched_total";
/// Retries counter metric name.
pub const METRIC_RETRIES: &str = "kalshi_retries_total";
/// Partial-source failures counter metric name.
pub const METRIC_PARTIAL_FAILURES: &str = "partial_source_failures_total";
/// Groups produced gauge metric name.
pub const METRIC_GROUPS: &str = "mention_groups";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    describe_histogram!(
        METRIC_HTTP_REQUEST_LATENCY,
        "Kalshi HTTP request latency in milliseconds"
    );
    describe_histogram!(
        METRIC_SIGNING_LATENCY,
        "RSA-PSS request signing latency in milliseconds"
    );
    describe_histogram!(
        METRIC_WINDOW_FETCH_LATENCY,
        "Time to plan and fetch one window in milliseconds"
    );

    describe_counter!(METRIC_PAGES_FETCHED, "Total number of listing pages fetched");
    describe_counter!(METRIC_RETRIES, "Total number of retried upstream requests");
    describe_counter!(
        METRIC_PARTIAL_FAILURES,
        "Fetch tasks skipped because their source failed"
    );

    describe_gauge!(METRIC_GROUPS, "Mention groups in the latest build");

    debug!("Metrics initialized");
}

/// Install the Prometheus recorder and describe metrics.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

/// Record HTTP request latency, labelled by response status.
pub fn record_http_request_latency(start: Instant, status: u16) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_HTTP_REQUEST_LATENCY, "status" => status.to_string()).record(latency_ms);
}

/// Record signing operation latency.
pub fn record_signing_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_SIGNING_LATENCY).record(latency_ms);
}

/// Count pages fetched by one pagination run.
pub fn record_pages_fetched(pages: usize) {
    counter!(METRIC_PAGES_FETCHED).increment(pages as u64);
}

/// Increment the retry counter.
pub fn record_retry() {
    counter!(METRIC_RETRIES).increment(1);
}

/// Count a skipped fetch task.
pub fn record_partial_failure(resource: &'static str) {
    counter!(METRIC_PARTIAL_FAILURES, "resource" => resource).increment(1);
}

/// Publish the group count for a view.
pub fn set_groups(view: &'static str, count: usize) {
    gauge!(METRIC_GROUPS, "view" => view).set(count as f64);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for a window fetch.
pub fn timer_window_fetch() -> LatencyTimer {
    LatencyTimer::new(METRIC_WINDOW_FETCH_LATENCY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn latency_timer_measures_time() {
        let timer = LatencyTimer::new("test_metric");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 9.0);
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_pages_fetched(3);
        record_retry();
        record_partial_failure("events");
        set_groups("active", 2);
        record_http_request_latency(Instant::now(), 200);
    }
}
