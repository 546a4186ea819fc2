//! Prometheus metrics exposition
//!
//! Service-level metrics recorded here:
//!
//! - `review_requests_total` (counter): labels `operation`, `outcome`
//! - `review_request_duration_seconds` (histogram): label `operation`
//! - `review_upstream_errors_total` (counter): label `kind`
//!
//! The key-pool crate records `credential_pool_retries_total` and
//! `credential_pool_exhausted_resets_total` through the same recorder.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "review_request_duration_seconds";

/// Upstream calls can take a while for large inputs; buckets run 50ms to 120s.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("histogram bucket list is non-empty")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Panics if a global recorder is already installed; call once at startup.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed review or optimize request.
pub fn record_request(operation: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "review_requests_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    metrics::histogram!(DURATION_METRIC, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record a classified upstream failure.
pub fn record_upstream_error(kind: &str) {
    metrics::counter!("review_upstream_errors_total", "kind" => kind.to_string()).increment(1);
}
