//! Token validation pipeline.
//!
//! # Components
//!
//! - `keys` - JWK decoding into verification keys
//! - `jwks` - Key source and coalescing key cache
//! - `verifier` - Signature verification
//! - `claims` - Issuer, audience and validity-window checks

pub mod claims;
pub mod jwks;
pub mod keys;
pub mod verifier;

pub use claims::{ClaimError, ClaimsValidator, ExpectedClaims};
pub use jwks::{HttpKeySource, KeyCache, KeyCacheSettings, KeyError, KeySource};
pub use keys::{Jwk, JwksDocument, KeySet, VerificationKey};
pub use verifier::{SignatureVerifier, VerifyError};
