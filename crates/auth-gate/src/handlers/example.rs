//! Demo endpoints on either side of the gate.
//!
//! Under the default policy `/api/example` requires a bearer token and
//! `/example` does not.

use crate::gate::Principal;
use axum::Extension;
use tracing::instrument;

/// Handler for GET /api/example
#[instrument(skip_all, name = "gate.example.secure")]
pub async fn secure_example(principal: Option<Extension<Principal>>) -> &'static str {
    if let Some(Extension(principal)) = principal {
        tracing::debug!(target: "gate.handlers", issuer = %principal.issuer, "Serving secure example");
    }
    "Received secure response."
}

/// Handler for GET /example
#[instrument(skip_all, name = "gate.example.unsecure")]
pub async fn unsecure_example() -> &'static str {
    "Received unsecure response."
}
