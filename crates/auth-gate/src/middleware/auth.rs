//! Authentication middleware.
//!
//! Runs the [`AuthGate`] for every request. Allowed requests continue with
//! the authenticated [`Principal`] (if any) in request extensions; denied
//! requests get a 401 or 403 response.

use crate::errors::GateError;
use crate::gate::{AuthGate, AuthRequest, Decision, Principal};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub gate: Arc<AuthGate>,
}

/// Enforce the access policy.
///
/// # Response
///
/// - 401 Unauthorized with `WWW-Authenticate: Bearer` when authentication
///   is required and fails
/// - 403 Forbidden when the path is denied by policy
/// - Otherwise the next handler's response
#[instrument(skip_all, name = "gate.middleware.auth")]
pub async fn enforce_policy(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GateError> {
    let decision = {
        let auth_request = AuthRequest::from(&req);
        state.gate.authenticate(&auth_request).await
    };

    match decision {
        Decision::Allow(principal) => {
            if let Some(principal) = principal {
                req.extensions_mut().insert(principal);
            }
            Ok(next.run(req).await)
        }
        Decision::Deny(reason) => {
            tracing::debug!(
                target: "gate.middleware.auth",
                method = %req.method(),
                path = %req.uri().path(),
                reason = %reason,
                "Request rejected"
            );
            Err(GateError::from(reason))
        }
    }
}

/// Extension trait for reading the authenticated principal from a request.
pub trait PrincipalExt {
    /// Returns `None` on public paths.
    fn principal(&self) -> Option<&Principal>;
}

impl<B> PrincipalExt for axum::extract::Request<B> {
    fn principal(&self) -> Option<&Principal> {
        self.extensions().get::<Principal>()
    }
}
