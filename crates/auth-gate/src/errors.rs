//! Auth gate error types.
//!
//! Denials map to HTTP responses via the `IntoResponse` impl. Messages
//! returned to clients are generic and never name the specific reason; the
//! reason is logged server-side.

use crate::gate::DenyReason;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Gate error type.
///
/// Maps to HTTP status codes:
/// - Unauthorized: 401 Unauthorized with `WWW-Authenticate: Bearer`
/// - Forbidden: 403 Forbidden
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Unauthorized: {0}")]
    Unauthorized(DenyReason),

    #[error("Forbidden")]
    Forbidden,
}

impl GateError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::Unauthorized(_) => 401,
            GateError::Forbidden => 403,
        }
    }
}

impl From<DenyReason> for GateError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Forbidden => GateError::Forbidden,
            other => GateError::Unauthorized(other),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// `WWW-Authenticate` challenge for a denial.
///
/// A request that sent no credential gets a bare challenge; a rejected token
/// gets `error="invalid_token"`.
fn challenge(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::MissingCredential => "Bearer realm=\"auth-gate\"",
        _ => "Bearer realm=\"auth-gate\", error=\"invalid_token\"",
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GateError::Unauthorized(reason) => {
                tracing::debug!(target: "gate.errors", reason = %reason, "Responding 401");
                (
                    StatusCode::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "Full authentication is required to access this resource",
                )
            }
            GateError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access to this resource is denied",
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if let GateError::Unauthorized(reason) = self {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(challenge(reason)),
            );
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::claims::ClaimError;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_from_deny_reason() {
        assert_eq!(GateError::from(DenyReason::Forbidden), GateError::Forbidden);
        assert_eq!(
            GateError::from(DenyReason::InvalidSignature),
            GateError::Unauthorized(DenyReason::InvalidSignature)
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GateError::Unauthorized(DenyReason::MissingCredential).status_code(),
            401
        );
        assert_eq!(GateError::Forbidden.status_code(), 403);
    }

    #[tokio::test]
    async fn test_unauthorized_response_is_generic() {
        let reasons = [
            DenyReason::MalformedToken,
            DenyReason::InvalidSignature,
            DenyReason::KeyUnavailable,
            DenyReason::ClaimInvalid(ClaimError::Expired),
        ];

        for reason in reasons {
            let response = GateError::Unauthorized(reason).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

            let www_auth = response
                .headers()
                .get("WWW-Authenticate")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string();
            assert!(www_auth.starts_with("Bearer realm=\"auth-gate\""));
            assert!(www_auth.contains("error=\"invalid_token\""));

            let body = read_body_json(response.into_body()).await;
            assert_eq!(body["error"]["code"], "UNAUTHORIZED");
            let message = body["error"]["message"].as_str().unwrap();
            assert!(!message.contains(reason.code()));
        }
    }

    #[tokio::test]
    async fn test_missing_credential_challenge_has_no_error() {
        let response = GateError::Unauthorized(DenyReason::MissingCredential).into_response();

        assert_eq!(
            response.headers().get("WWW-Authenticate").unwrap(),
            "Bearer realm=\"auth-gate\""
        );
    }

    #[tokio::test]
    async fn test_forbidden_response() {
        let response = GateError::Forbidden.into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }
}
