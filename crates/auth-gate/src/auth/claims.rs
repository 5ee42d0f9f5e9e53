//! Claim validation against the gate's trust configuration.
//!
//! Checks run in a fixed order and the first failure wins:
//! issuer, audience, expiry, not-before.

use common::jwt::{TokenClaims, DEFAULT_CLOCK_SKEW};
use std::time::Duration;
use thiserror::Error;

/// Which claim check failed.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("issuer mismatch")]
    Issuer,

    #[error("audience mismatch")]
    Audience,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

impl ClaimError {
    /// Bounded label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ClaimError::Issuer => "issuer",
            ClaimError::Audience => "audience",
            ClaimError::Expired => "expired",
            ClaimError::NotYetValid => "not_yet_valid",
        }
    }
}

/// The issuer and audiences a token must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedClaims {
    pub issuer: String,
    /// A token is accepted if its audience set contains any of these.
    pub audiences: Vec<String>,
}

impl ExpectedClaims {
    pub fn new(issuer: impl Into<String>, audiences: Vec<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audiences,
        }
    }
}

/// Validates token claims at a given instant.
#[derive(Debug, Clone)]
pub struct ClaimsValidator {
    expected: ExpectedClaims,
    clock_skew_seconds: i64,
}

impl ClaimsValidator {
    pub fn new(expected: ExpectedClaims) -> Self {
        Self {
            expected,
            clock_skew_seconds: DEFAULT_CLOCK_SKEW.as_secs() as i64,
        }
    }

    /// Tolerate clocks that differ by up to `skew`.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew_seconds = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);
        self
    }

    /// Validate `claims` at Unix time `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failed check.
    pub fn validate(&self, claims: &TokenClaims, now: i64) -> Result<(), ClaimError> {
        if claims.iss != self.expected.issuer {
            return Err(ClaimError::Issuer);
        }

        if !self
            .expected
            .audiences
            .iter()
            .any(|aud| claims.aud.contains(aud))
        {
            return Err(ClaimError::Audience);
        }

        // exp == now is already expired
        if claims.exp.saturating_add(self.clock_skew_seconds) <= now {
            return Err(ClaimError::Expired);
        }

        if let Some(nbf) = claims.nbf {
            if nbf.saturating_sub(self.clock_skew_seconds) > now {
                return Err(ClaimError::NotYetValid);
            }
        }

        Ok(())
    }
}
