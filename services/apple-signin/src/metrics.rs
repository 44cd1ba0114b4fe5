//! Prometheus metrics exposition
//!
//! - `apple_auth_attempts_total` (counter): labels `flow`, `outcome`
//! - `apple_auth_duration_seconds` (histogram): label `flow`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "apple_auth_duration_seconds";

/// An attempt spans a token exchange and possibly a key fetch, each bounded
/// by the HTTP timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record one authentication attempt.
///
/// `outcome` is one of `success`, `fail`, `bad_request`, `redirect`, `error`.
pub fn record_attempt(flow: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("apple_auth_attempts_total", "flow" => flow, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "flow" => flow).record(duration_secs);
}
