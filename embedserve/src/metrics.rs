//! Ambient Prometheus metrics recording helpers.
//!
//! The dispatcher and engine call these directly; the exporter itself (HTTP
//! scrape endpoint, registration) lives in the CLI crate, mirroring how the
//! reference stack splits metric *recording* (library-side, via the
//! `metrics` facade) from metric *exposition* (binary-side, via
//! `PrometheusBuilder`).
use std::time::Duration;

/// Records one batch dispatched to an embedder: its size and how long the
/// forward pass took.
pub fn record_batch(served_name: &str, size: usize, duration: Duration) {
    metrics::histogram!("embedserve_batch_size", "model" => served_name.to_string())
        .record(size as f64);
    metrics::histogram!("embedserve_batch_duration_seconds", "model" => served_name.to_string())
        .record(duration.as_secs_f64());
}

/// Records how long one request item waited in queue before its batch was
/// dispatched.
pub fn record_queue_wait(served_name: &str, waited: Duration) {
    metrics::histogram!("embedserve_queue_wait_seconds", "model" => served_name.to_string())
        .record(waited.as_secs_f64());
}

/// Increments the count of requests received for a model.
pub fn record_request_received(served_name: &str) {
    metrics::counter!("embedserve_requests_received_total", "model" => served_name.to_string())
        .increment(1);
}

/// Increments the count of requests that completed successfully.
pub fn record_request_completed(served_name: &str) {
    metrics::counter!("embedserve_requests_completed_total", "model" => served_name.to_string())
        .increment(1);
}

/// Increments the count of requests that failed, tagged by error kind
/// (`"config"`, `"inference"`, `"shutdown"`, ...).
pub fn record_request_failed(served_name: &str, kind: &str) {
    metrics::counter!(
        "embedserve_requests_failed_total",
        "model" => served_name.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}
