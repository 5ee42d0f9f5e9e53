//! Health check handler.
//!
//! Liveness only: the gate keeps serving cached keys while the trust
//! authority is unreachable, so key availability is not part of health.

use tracing::instrument;

/// Handler for GET /health
#[instrument(skip_all, name = "gate.health.check")]
pub async fn health_check() -> &'static str {
    "OK"
}
