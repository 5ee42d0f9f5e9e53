//! Metrics definitions for the auth gate.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gate_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code:
//! - `outcome`: allow, deny
//! - `reason`: requirement or deny reason code (~10 values)
//! - `status`: success, error
//! - `result`: hit, miss

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Returns an error if bucket configuration fails or a recorder is already
/// installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // JWKS fetches are bounded by the fetch timeout (5s default)
        .set_buckets_for_metric(
            Matcher::Prefix("gate_jwks_fetch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record an authentication decision
///
/// Metric: `gate_auth_decisions_total`
/// Labels: `outcome`, `reason`
pub fn record_auth_decision(outcome: &'static str, reason: &'static str) {
    counter!("gate_auth_decisions_total",
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

/// Record a JWKS fetch
///
/// Metric: `gate_jwks_fetch_total`, `gate_jwks_fetch_duration_seconds`
/// Labels: `status`
pub fn record_jwks_fetch(status: &'static str, duration: Duration) {
    histogram!("gate_jwks_fetch_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("gate_jwks_fetch_total",
        "status" => status
    )
    .increment(1);
}

/// Record a key cache lookup
///
/// Metric: `gate_jwks_cache_total`
/// Labels: `result`
pub fn record_jwks_cache(result: &'static str) {
    counter!("gate_jwks_cache_total",
        "result" => result
    )
    .increment(1);
}
