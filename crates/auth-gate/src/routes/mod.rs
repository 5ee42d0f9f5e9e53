//! HTTP routes for the auth gate.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::gate::AuthGate;
use crate::handlers;
use crate::middleware::{enforce_policy, AuthState};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// The gate every request passes through.
    pub gate: Arc<AuthGate>,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        let gate = Arc::new(AuthGate::from_config(&config));
        Self { config, gate }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Liveness probe (simple "OK")
/// - `/metrics` - Prometheus metrics endpoint
/// - `/api/example` - Demo endpoint, protected under the default policy
/// - `/example` - Demo endpoint, public under the default policy
/// - The gate applied to every request, including unmatched paths
/// - TraceLayer for request logging
/// - 30 second request timeout
///
/// Which paths need a token is decided by the configured policy, not by
/// how routes are grouped here.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        gate: Arc::clone(&state.gate),
    });

    let app_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/example", get(handlers::secure_example))
        .route("/example", get(handlers::unsecure_example));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. enforce_policy - Gate decision (innermost)
    // 2. TimeoutLayer - Timeout the request, dropping an in-flight gate
    // 3. TraceLayer - Log request details
    app_routes
        .merge(metrics_routes)
        .layer(middleware::from_fn_with_state(auth_state, enforce_policy))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
}
