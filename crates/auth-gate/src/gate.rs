//! The authentication gate.
//!
//! [`AuthGate`] turns one inbound request into exactly one [`Decision`]:
//!
//! ```text
//! path -> PolicyEngine
//!   Public        -> Allow(None)
//!   Deny          -> Deny(Forbidden)
//!   Authenticated -> bearer token -> TokenParser -> SignatureVerifier
//!                    -> ClaimsValidator -> Allow(Some(principal))
//! ```
//!
//! Public paths never touch the token pipeline or the key cache.

use crate::auth::claims::{ClaimError, ClaimsValidator, ExpectedClaims};
use crate::auth::jwks::{HttpKeySource, KeyCache};
use crate::auth::verifier::{SignatureVerifier, VerifyError};
use crate::config::Config;
use crate::observability::metrics;
use crate::policy::{Policy, PolicyEngine, Requirement};
use axum::http::{header, HeaderValue, Method, Request};
use common::jwt::TokenParser;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No usable `Authorization: Bearer` credential.
    MissingCredential,

    /// The token is not a structurally valid JWT.
    MalformedToken,

    /// Signature or algorithm checks failed.
    InvalidSignature,

    /// No verification key could be obtained for the token's key ID.
    KeyUnavailable,

    /// A claim check failed.
    ClaimInvalid(ClaimError),

    /// The path is denied by policy.
    Forbidden,
}

impl DenyReason {
    /// Bounded label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::MissingCredential => "missing_credential",
            DenyReason::MalformedToken => "malformed_token",
            DenyReason::InvalidSignature => "invalid_signature",
            DenyReason::KeyUnavailable => "key_unavailable",
            DenyReason::ClaimInvalid(ClaimError::Issuer) => "claim_issuer",
            DenyReason::ClaimInvalid(ClaimError::Audience) => "claim_audience",
            DenyReason::ClaimInvalid(ClaimError::Expired) => "claim_expired",
            DenyReason::ClaimInvalid(ClaimError::NotYetValid) => "claim_not_yet_valid",
            DenyReason::Forbidden => "forbidden",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<VerifyError> for DenyReason {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::SignatureInvalid => DenyReason::InvalidSignature,
            VerifyError::KeyResolutionFailed(_) => DenyReason::KeyUnavailable,
        }
    }
}

/// The authenticated caller.
///
/// The subject is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub issuer: String,
    pub audiences: Vec<String>,
    /// Token expiry (Unix epoch seconds).
    pub expires_at: i64,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("subject", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("audiences", &self.audiences)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Outcome of the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed. Carries the principal when the path required authentication.
    Allow(Option<Principal>),

    /// Refuse.
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// The parts of a request the gate reads.
///
/// Borrowed from the request so the body never has to cross an await point.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub authorization: Option<&'a HeaderValue>,
}

impl<'a, B> From<&'a Request<B>> for AuthRequest<'a> {
    fn from(req: &'a Request<B>) -> Self {
        Self {
            method: req.method(),
            path: req.uri().path(),
            authorization: req.headers().get(header::AUTHORIZATION),
        }
    }
}

struct TokenPipeline {
    parser: TokenParser,
    verifier: SignatureVerifier,
    claims: ClaimsValidator,
}

/// Per-request authentication and authorization decisions.
pub struct AuthGate {
    policy: PolicyEngine,
    pipeline: Option<TokenPipeline>,
}

impl AuthGate {
    pub fn new(
        policy: PolicyEngine,
        parser: TokenParser,
        verifier: SignatureVerifier,
        claims: ClaimsValidator,
    ) -> Self {
        Self {
            policy,
            pipeline: Some(TokenPipeline {
                parser,
                verifier,
                claims,
            }),
        }
    }

    /// A gate that lets every request through.
    pub fn permit_all() -> Self {
        Self {
            policy: PolicyEngine::new(Policy::permit_all()),
            pipeline: None,
        }
    }

    /// Build the gate described by the service configuration.
    pub fn from_config(config: &Config) -> Self {
        let Some(trust) = config.trust.as_ref() else {
            tracing::warn!(target: "gate.auth", "Authentication disabled, all paths are public");
            return Self::permit_all();
        };

        let source = Arc::new(HttpKeySource::new(
            trust.jwks_uri.clone(),
            config.key_cache.fetch_timeout,
        ));
        let cache = Arc::new(KeyCache::with_settings(source, config.key_cache));

        let parser = match config.jwt_algorithm {
            Some(algorithm) => TokenParser::with_fixed_algorithm(algorithm),
            None => TokenParser::new(),
        };
        let verifier = SignatureVerifier::new(cache).with_fixed_algorithm(config.jwt_algorithm);
        let claims = ClaimsValidator::new(ExpectedClaims::new(
            trust.issuer.clone(),
            trust.audiences.clone(),
        ))
        .with_clock_skew(config.clock_skew);

        Self::new(
            PolicyEngine::new(config.policy.clone()),
            parser,
            verifier,
            claims,
        )
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// The key cache, if the gate validates tokens.
    pub fn key_cache(&self) -> Option<&Arc<KeyCache>> {
        self.pipeline.as_ref().map(|p| p.verifier.key_cache())
    }

    /// Decide on a request at the current time.
    pub async fn authenticate(&self, req: &AuthRequest<'_>) -> Decision {
        self.authenticate_at(req, chrono::Utc::now().timestamp())
            .await
    }

    /// Decide on a request at Unix time `now`.
    #[instrument(skip_all, name = "gate.authenticate", fields(method = %req.method, path = %req.path))]
    pub async fn authenticate_at(&self, req: &AuthRequest<'_>, now: i64) -> Decision {
        let requirement = self.policy.requirement_for(req.path);

        let decision = match requirement {
            Requirement::Public => Decision::Allow(None),
            Requirement::Deny => Decision::Deny(DenyReason::Forbidden),
            Requirement::Authenticated => match self.validate(req, now).await {
                Ok(principal) => Decision::Allow(Some(principal)),
                Err(reason) => Decision::Deny(reason),
            },
        };

        match &decision {
            Decision::Allow(_) => {
                tracing::debug!(target: "gate.auth", requirement = %requirement, "Request allowed");
                metrics::record_auth_decision("allow", requirement.as_str());
            }
            Decision::Deny(reason) => {
                tracing::debug!(target: "gate.auth", requirement = %requirement, reason = %reason, "Request denied");
                metrics::record_auth_decision("deny", reason.code());
            }
        }

        decision
    }

    async fn validate(&self, req: &AuthRequest<'_>, now: i64) -> Result<Principal, DenyReason> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            tracing::error!(target: "gate.auth", "Path requires authentication but no token validation is configured");
            return Err(DenyReason::KeyUnavailable);
        };

        let token = req
            .authorization
            .and_then(bearer_token)
            .ok_or(DenyReason::MissingCredential)?;

        let token = pipeline.parser.parse(token).map_err(|e| {
            tracing::debug!(target: "gate.auth", error = %e, "Token parse failed");
            DenyReason::MalformedToken
        })?;

        pipeline.verifier.verify(&token).await.map_err(|e| {
            tracing::debug!(target: "gate.auth", error = %e, "Token verification failed");
            DenyReason::from(e)
        })?;

        let claims = token.claims();
        pipeline
            .claims
            .validate(claims, now)
            .map_err(DenyReason::ClaimInvalid)?;

        Ok(Principal {
            subject: claims.sub.clone(),
            issuer: claims.iss.clone(),
            audiences: claims.aud.as_slice().to_vec(),
            expires_at: claims.exp,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
///
/// The scheme is case-insensitive; the token must be non-empty and contain
/// no whitespace.
fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let value = value.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn header(value: &str) -> HeaderValue {
        HeaderValue::from_str(value).unwrap()
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token(&header("Bearer abc.def.ghi")), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&header("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&header("BEARER   abc  ")), Some("abc"));
    }

    #[test]
    fn test_bearer_token_rejects_other_forms() {
        for value in [
            "",
            "Bearer",
            "Bearer ",
            "Basic dXNlcjpwYXNz",
            "Bearerabc",
            "Bearer abc def",
            "Token abc",
        ] {
            assert_eq!(bearer_token(&header(value)), None, "value {:?}", value);
        }
    }

    #[test]
    fn test_bearer_token_rejects_non_utf8() {
        let value = HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap();
        assert_eq!(bearer_token(&value), None);
    }

    #[test]
    fn test_deny_reason_codes() {
        assert_eq!(DenyReason::MissingCredential.code(), "missing_credential");
        assert_eq!(DenyReason::MalformedToken.code(), "malformed_token");
        assert_eq!(DenyReason::InvalidSignature.code(), "invalid_signature");
        assert_eq!(DenyReason::KeyUnavailable.code(), "key_unavailable");
        assert_eq!(
            DenyReason::ClaimInvalid(ClaimError::Expired).code(),
            "claim_expired"
        );
        assert_eq!(DenyReason::Forbidden.code(), "forbidden");
    }

    #[test]
    fn test_verify_error_mapping() {
        use crate::auth::jwks::KeyError;

        assert_eq!(
            DenyReason::from(VerifyError::SignatureInvalid),
            DenyReason::InvalidSignature
        );
        assert_eq!(
            DenyReason::from(VerifyError::KeyResolutionFailed(KeyError::UnknownKey(
                "k".to_string()
            ))),
            DenyReason::KeyUnavailable
        );
    }

    #[test]
    fn test_principal_debug_redacts_subject() {
        let principal = Principal {
            subject: "secret-user-id".to_string(),
            issuer: "ISSUER".to_string(),
            audiences: vec!["AUDIENCE".to_string()],
            expires_at: 0,
        };

        let debug = format!("{:?}", principal);
        assert!(!debug.contains("secret-user-id"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_auth_request_from_http_request() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/example?x=1")
            .header("authorization", "Bearer t")
            .body(())
            .unwrap();

        let auth = AuthRequest::from(&req);
        assert_eq!(auth.method, Method::POST);
        assert_eq!(auth.path, "/api/example");
        assert_eq!(auth.authorization.unwrap(), "Bearer t");
    }

    #[tokio::test]
    async fn test_permit_all_allows_everything() {
        let gate = AuthGate::permit_all();
        let req = Request::builder().uri("/api/example").body(()).unwrap();

        assert_eq!(
            gate.authenticate(&AuthRequest::from(&req)).await,
            Decision::Allow(None)
        );
        assert!(gate.key_cache().is_none());
    }
}
