//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! This endpoint is public under the default policy so Prometheus can
//! scrape it. Metric labels carry no subjects or tokens.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Returns Prometheus text format:
/// ```text
/// # TYPE gate_auth_decisions_total counter
/// gate_auth_decisions_total{outcome="deny",reason="missing_credential"} 3
/// ```
#[tracing::instrument(skip_all, name = "gate.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
