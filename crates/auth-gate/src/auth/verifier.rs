//! Token signature verification.
//!
//! Resolves the signing key through the [`KeyCache`] and checks the signature
//! over the token's exact signing input.
//!
//! # Security
//!
//! - Only asymmetric algorithms are accepted; `none` and HMAC are rejected
//!   before any key lookup
//! - The key's family, declared algorithm and curve must match the header
//!   algorithm, nothing is coerced
//! - When a fixed algorithm is configured, tokens naming any other algorithm
//!   are rejected

use crate::auth::jwks::{KeyCache, KeyError};
use crate::auth::keys::KeyFamily;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::jwt::{parse_algorithm, Token};
use jsonwebtoken::Algorithm;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Signature verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("signature is invalid")]
    SignatureInvalid,

    #[error("verification key unavailable: {0}")]
    KeyResolutionFailed(#[from] KeyError),
}

/// Verifies token signatures against keys from the trust authority.
pub struct SignatureVerifier {
    keys: Arc<KeyCache>,
    fixed_algorithm: Option<Algorithm>,
}

impl SignatureVerifier {
    pub fn new(keys: Arc<KeyCache>) -> Self {
        Self {
            keys,
            fixed_algorithm: None,
        }
    }

    /// Only accept tokens signed with `algorithm`.
    pub fn with_fixed_algorithm(mut self, algorithm: Option<Algorithm>) -> Self {
        self.fixed_algorithm = algorithm;
        self
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Verify the token's signature.
    ///
    /// # Errors
    ///
    /// - `VerifyError::SignatureInvalid` for disallowed algorithms, key/algorithm
    ///   mismatches and signatures that do not verify
    /// - `VerifyError::KeyResolutionFailed` when no key for the token's `kid`
    ///   could be obtained
    #[instrument(skip_all, fields(kid = %token.header().kid, alg = %token.header().alg))]
    pub async fn verify(&self, token: &Token) -> Result<(), VerifyError> {
        let header = token.header();

        let algorithm = self.accepted_algorithm(&header.alg)?;

        let key = self.keys.resolve(&header.kid).await?;

        if !key.supports(algorithm) {
            tracing::warn!(
                target: "gate.auth.verifier",
                kid = %header.kid,
                alg = %header.alg,
                key_family = ?key.family(),
                "Token algorithm does not match verification key"
            );
            return Err(VerifyError::SignatureInvalid);
        }

        let signature = URL_SAFE_NO_PAD.encode(token.signature());
        let valid = jsonwebtoken::crypto::verify(
            &signature,
            token.signing_input().as_bytes(),
            key.decoding_key(),
            algorithm,
        )
        .map_err(|e| {
            tracing::debug!(target: "gate.auth.verifier", error = %e, "Signature verification errored");
            VerifyError::SignatureInvalid
        })?;

        if !valid {
            tracing::debug!(target: "gate.auth.verifier", kid = %header.kid, "Signature mismatch");
            return Err(VerifyError::SignatureInvalid);
        }

        Ok(())
    }

    /// Map the header algorithm to an accepted asymmetric algorithm.
    fn accepted_algorithm(&self, name: &str) -> Result<Algorithm, VerifyError> {
        let algorithm = parse_algorithm(name)
            .filter(|alg| KeyFamily::for_algorithm(*alg).is_some())
            .ok_or_else(|| {
                tracing::debug!(target: "gate.auth.verifier", alg = %name, "Token algorithm not accepted");
                VerifyError::SignatureInvalid
            })?;

        match self.fixed_algorithm {
            Some(fixed) if fixed != algorithm => {
                tracing::debug!(
                    target: "gate.auth.verifier",
                    alg = %name,
                    expected = ?fixed,
                    "Token algorithm differs from configured algorithm"
                );
                Err(VerifyError::SignatureInvalid)
            }
            _ => Ok(algorithm),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::KeySource;
    use crate::auth::keys::JwksDocument;
    use async_trait::async_trait;
    use common::jwt::TokenParser;
    use gate_test_utils::{relabel_algorithm, swap_claims, tamper_signature, TestKeypair, TokenBuilder};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticSource {
        document: serde_json::Value,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl KeySource for StaticSource {
        async fn fetch(&self) -> Result<JwksDocument, KeyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            serde_json::from_value(self.document.clone())
                .map_err(|e| KeyError::InvalidDocument(e.to_string()))
        }
    }

    fn verifier_for(keys: &[&TestKeypair]) -> (SignatureVerifier, Arc<StaticSource>) {
        let jwks: Vec<_> = keys.iter().map(|k| k.jwk_json()).collect();
        let source = Arc::new(StaticSource {
            document: serde_json::json!({ "keys": jwks }),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(KeyCache::new(source.clone()));
        (SignatureVerifier::new(cache), source)
    }

    fn parse(token: &str) -> Token {
        TokenParser::new().parse(token).unwrap()
    }

    #[tokio::test]
    async fn test_valid_rsa_signature() {
        let keypair = TestKeypair::rsa("rsa-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        let token = TokenBuilder::new().sign(&keypair);

        verifier.verify(&parse(&token)).await.unwrap();
    }

    #[tokio::test]
    async fn test_valid_ed25519_signature() {
        let keypair = TestKeypair::ed25519(1, "ed-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        let token = TokenBuilder::new().sign(&keypair);

        verifier.verify(&parse(&token)).await.unwrap();
    }

    #[tokio::test]
    async fn test_valid_es256_signature() {
        let keypair = TestKeypair::es256("ec-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        let token = TokenBuilder::new().sign(&keypair);

        verifier.verify(&parse(&token)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_signature_is_rejected() {
        let keypair = TestKeypair::ed25519(1, "ed-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        let token = TokenBuilder::new().sign(&keypair);
        let tampered = tamper_signature(&token);

        assert_eq!(
            verifier.verify(&parse(&tampered)).await,
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_tampered_payload_is_rejected() {
        let keypair = TestKeypair::rsa("rsa-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        let token = TokenBuilder::new().subject("alice").sign(&keypair);
        let forged = TokenBuilder::new().subject("mallory").sign(&keypair);

        // Original header and signature around a different payload
        let spliced = swap_claims(&token, &forged);

        assert_eq!(
            verifier.verify(&parse(&spliced)).await,
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_signature_from_other_key_is_rejected() {
        let trusted = TestKeypair::ed25519(1, "shared-kid");
        let attacker = TestKeypair::ed25519(2, "shared-kid");
        let (verifier, _) = verifier_for(&[&trusted]);

        let token = TokenBuilder::new().sign(&attacker);

        assert_eq!(
            verifier.verify(&parse(&token)).await,
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_disallowed_algorithms_skip_key_lookup() {
        let keypair = TestKeypair::rsa("rsa-1");
        let (verifier, source) = verifier_for(&[&keypair]);

        for alg in ["none", "HS256", "HS512", "XYZ"] {
            let token = TokenBuilder::new().unsigned_with_alg(alg, "rsa-1");
            assert_eq!(
                verifier.verify(&parse(&token)).await,
                Err(VerifyError::SignatureInvalid),
                "alg {} should be rejected",
                alg
            );
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_family_mismatch_is_rejected() {
        let keypair = TestKeypair::rsa("rsa-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        // Valid RSA token re-labelled as EdDSA
        let token = TokenBuilder::new().sign(&keypair);
        let relabelled = relabel_algorithm(&token, "EdDSA");

        assert_eq!(
            verifier.verify(&parse(&relabelled)).await,
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_declared_key_algorithm_must_match() {
        let keypair = TestKeypair::rsa("rsa-1");
        let (verifier, _) = verifier_for(&[&keypair]);

        // JWK declares RS256; a PS256 header must not be accepted
        let token = TokenBuilder::new().sign(&keypair);
        let relabelled = relabel_algorithm(&token, "PS256");

        assert_eq!(
            verifier.verify(&parse(&relabelled)).await,
            Err(VerifyError::SignatureInvalid)
        );
    }

    #[tokio::test]
    async fn test_fixed_algorithm_rejects_others() {
        let keypair = TestKeypair::ed25519(1, "ed-1");
        let (verifier, source) = verifier_for(&[&keypair]);
        let verifier = verifier.with_fixed_algorithm(Some(Algorithm::RS256));

        let token = TokenBuilder::new().sign(&keypair);

        assert_eq!(
            verifier.verify(&parse(&token)).await,
            Err(VerifyError::SignatureInvalid)
        );
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_kid_is_key_resolution_failure() {
        let trusted = TestKeypair::ed25519(1, "ed-1");
        let other = TestKeypair::ed25519(1, "ed-unknown");
        let (verifier, _) = verifier_for(&[&trusted]);

        let token = TokenBuilder::new().sign(&other);

        assert_eq!(
            verifier.verify(&parse(&token)).await,
            Err(VerifyError::KeyResolutionFailed(KeyError::UnknownKey(
                "ed-unknown".to_string()
            )))
        );
    }
}
