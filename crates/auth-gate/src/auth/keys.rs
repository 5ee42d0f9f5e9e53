//! Verification keys built from JSON Web Keys.
//!
//! A [`KeySet`] is built once per fetched JWKS document and never mutated.
//! Keys the gate cannot use (no `kid`, encryption keys, symmetric keys,
//! undecodable material) are skipped with a warning instead of failing the
//! whole document.

use common::jwt::{algorithm_name, parse_algorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// JSON Web Key as published by the trust authority.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is meant for, if the publisher pins one.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (must be "sig" when present).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate or OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,
}

/// JWKS document: `{"keys": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Asymmetric key family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Okp,
}

impl KeyFamily {
    /// Family an algorithm needs. `None` for symmetric (HMAC) algorithms,
    /// which are never accepted.
    pub fn for_algorithm(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(KeyFamily::Ec),
            Algorithm::EdDSA => Some(KeyFamily::Okp),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
        }
    }

    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(KeyFamily::Rsa),
            "EC" => Some(KeyFamily::Ec),
            "OKP" => Some(KeyFamily::Okp),
            _ => None,
        }
    }
}

/// Curve an EC algorithm is defined over.
fn curve_for(algorithm: Algorithm) -> Option<&'static str> {
    match algorithm {
        Algorithm::ES256 => Some("P-256"),
        Algorithm::ES384 => Some("P-384"),
        _ => None,
    }
}

/// Why a JWK was left out of the key set.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwkRejection {
    #[error("missing kid")]
    MissingKid,

    #[error("key use is {0}, not sig")]
    NotSigningKey(String),

    #[error("unsupported key type {0}")]
    UnsupportedKeyType(String),

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("algorithm {alg} does not fit key type {kty}")]
    AlgorithmMismatch { alg: String, kty: String },

    #[error("missing parameter {0}")]
    MissingParameter(&'static str),

    #[error("unsupported curve {0}")]
    UnsupportedCurve(String),

    #[error("invalid key material: {0}")]
    InvalidMaterial(String),
}

/// A public key ready for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    curve: Option<String>,
    decoding_key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm.map(algorithm_name))
            .field("curve", &self.curve)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Build a verification key from a JWK.
    ///
    /// # Errors
    ///
    /// Returns the reason the key cannot be used for verification.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkRejection> {
        let kid = jwk
            .kid
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(JwkRejection::MissingKid)?;

        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(JwkRejection::NotSigningKey(key_use.to_string()));
            }
        }

        let family = KeyFamily::from_kty(&jwk.kty)
            .ok_or_else(|| JwkRejection::UnsupportedKeyType(jwk.kty.clone()))?;

        let algorithm = match jwk.alg.as_deref() {
            Some(name) => {
                let alg = parse_algorithm(name)
                    .ok_or_else(|| JwkRejection::UnsupportedAlgorithm(name.to_string()))?;
                if KeyFamily::for_algorithm(alg) != Some(family) {
                    return Err(JwkRejection::AlgorithmMismatch {
                        alg: name.to_string(),
                        kty: jwk.kty.clone(),
                    });
                }
                Some(alg)
            }
            None => None,
        };

        let invalid = |e: jsonwebtoken::errors::Error| JwkRejection::InvalidMaterial(e.to_string());

        let (decoding_key, curve) = match family {
            KeyFamily::Rsa => {
                let n = jwk.n.as_deref().ok_or(JwkRejection::MissingParameter("n"))?;
                let e = jwk.e.as_deref().ok_or(JwkRejection::MissingParameter("e"))?;
                (DecodingKey::from_rsa_components(n, e).map_err(invalid)?, None)
            }
            KeyFamily::Ec => {
                let crv = jwk.crv.as_deref().ok_or(JwkRejection::MissingParameter("crv"))?;
                if crv != "P-256" && crv != "P-384" {
                    return Err(JwkRejection::UnsupportedCurve(crv.to_string()));
                }
                let x = jwk.x.as_deref().ok_or(JwkRejection::MissingParameter("x"))?;
                let y = jwk.y.as_deref().ok_or(JwkRejection::MissingParameter("y"))?;
                (
                    DecodingKey::from_ec_components(x, y).map_err(invalid)?,
                    Some(crv.to_string()),
                )
            }
            KeyFamily::Okp => {
                let crv = jwk.crv.as_deref().unwrap_or("Ed25519");
                if crv != "Ed25519" {
                    return Err(JwkRejection::UnsupportedCurve(crv.to_string()));
                }
                let x = jwk.x.as_deref().ok_or(JwkRejection::MissingParameter("x"))?;
                (
                    DecodingKey::from_ed_components(x).map_err(invalid)?,
                    Some(crv.to_string()),
                )
            }
        };

        Ok(Self {
            kid,
            family,
            algorithm,
            curve,
            decoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Whether this key may verify a signature made with `algorithm`.
    ///
    /// The algorithm family must match the key type, a pinned JWK `alg` must
    /// match exactly, and EC curves must match the algorithm.
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        if KeyFamily::for_algorithm(algorithm) != Some(self.family) {
            return false;
        }
        if let Some(pinned) = self.algorithm {
            if pinned != algorithm {
                return false;
            }
        }
        if self.family == KeyFamily::Ec {
            return curve_for(algorithm) == self.curve.as_deref();
        }
        true
    }
}

/// Immutable map of key ID to verification key.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
}

impl KeySet {
    /// Build a key set from a JWKS document, skipping unusable keys.
    ///
    /// On duplicate key IDs the first usable key wins.
    pub fn from_document(document: &JwksDocument) -> Self {
        let mut keys = HashMap::with_capacity(document.keys.len());

        for jwk in &document.keys {
            match VerificationKey::from_jwk(jwk) {
                Ok(key) => {
                    if keys.contains_key(key.kid()) {
                        tracing::warn!(target: "gate.auth.keys", kid = %key.kid(), "Duplicate key ID in JWKS, keeping first");
                        continue;
                    }
                    keys.insert(key.kid().to_string(), Arc::new(key));
                }
                Err(reason) => {
                    tracing::warn!(
                        target: "gate.auth.keys",
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        reason = %reason,
                        "Skipping unusable JWK"
                    );
                }
            }
        }

        Self { keys }
    }

    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode([0xc3u8; 256]),
            "e": "AQAB"
        })
    }

    fn jwk(value: serde_json::Value) -> Jwk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_jwk_deserialization() {
        let json = r#"{
            "kty": "RSA",
            "kid": "test-key-01",
            "alg": "RS256",
            "use": "sig",
            "n": "sXch",
            "e": "AQAB"
        }"#;

        let jwk: Jwk = serde_json::from_str(json).unwrap();

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid.as_deref(), Some("test-key-01"));
        assert_eq!(jwk.alg.as_deref(), Some("RS256"));
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert_eq!(jwk.n.as_deref(), Some("sXch"));
        assert!(jwk.x.is_none());
    }

    #[test]
    fn test_jwks_document_deserialization() {
        let json = r#"{"keys": [{"kty": "RSA", "kid": "key-1"}, {"kty": "OKP", "kid": "key-2"}]}"#;
        let doc: JwksDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.keys.len(), 2);
    }

    #[test]
    fn test_rsa_key_supports_rsa_algorithms_only() {
        let key = VerificationKey::from_jwk(&jwk(rsa_jwk("k1"))).unwrap();

        assert_eq!(key.family(), KeyFamily::Rsa);
        assert!(key.supports(Algorithm::RS256));
        // Pinned alg rejects other RSA algorithms
        assert!(!key.supports(Algorithm::RS512));
        assert!(!key.supports(Algorithm::ES256));
        assert!(!key.supports(Algorithm::HS256));
    }

    #[test]
    fn test_unpinned_rsa_key_supports_family() {
        let mut value = rsa_jwk("k1");
        value.as_object_mut().unwrap().remove("alg");
        let key = VerificationKey::from_jwk(&jwk(value)).unwrap();

        assert!(key.supports(Algorithm::RS256));
        assert!(key.supports(Algorithm::PS384));
        assert!(!key.supports(Algorithm::EdDSA));
    }

    #[test]
    fn test_ec_key_requires_matching_curve() {
        let key = VerificationKey::from_jwk(&jwk(serde_json::json!({
            "kty": "EC",
            "kid": "ec-1",
            "crv": "P-256",
            "x": URL_SAFE_NO_PAD.encode([1u8; 32]),
            "y": URL_SAFE_NO_PAD.encode([2u8; 32])
        })))
        .unwrap();

        assert!(key.supports(Algorithm::ES256));
        assert!(!key.supports(Algorithm::ES384));
    }

    #[test]
    fn test_rejects_missing_kid() {
        let mut value = rsa_jwk("k1");
        value.as_object_mut().unwrap().remove("kid");
        assert_eq!(
            VerificationKey::from_jwk(&jwk(value)).unwrap_err(),
            JwkRejection::MissingKid
        );
    }

    #[test]
    fn test_rejects_encryption_key() {
        let mut value = rsa_jwk("k1");
        value["use"] = serde_json::json!("enc");
        assert!(matches!(
            VerificationKey::from_jwk(&jwk(value)),
            Err(JwkRejection::NotSigningKey(_))
        ));
    }

    #[test]
    fn test_rejects_symmetric_key() {
        let value = serde_json::json!({"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"});
        assert!(matches!(
            VerificationKey::from_jwk(&jwk(value)),
            Err(JwkRejection::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn test_rejects_pinned_algorithm_of_other_family() {
        let mut value = rsa_jwk("k1");
        value["alg"] = serde_json::json!("ES256");
        assert!(matches!(
            VerificationKey::from_jwk(&jwk(value)),
            Err(JwkRejection::AlgorithmMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_rsa_material() {
        let mut value = rsa_jwk("k1");
        value["n"] = serde_json::json!("!!!not-base64!!!");
        assert!(matches!(
            VerificationKey::from_jwk(&jwk(value)),
            Err(JwkRejection::InvalidMaterial(_))
        ));
    }

    #[test]
    fn test_key_set_skips_unusable_keys_and_keeps_first_duplicate() {
        let mut duplicate = rsa_jwk("k1");
        duplicate["alg"] = serde_json::json!("RS512");
        let doc: JwksDocument = serde_json::from_value(serde_json::json!({
            "keys": [
                rsa_jwk("k1"),
                duplicate,
                {"kty": "oct", "kid": "hmac"},
                rsa_jwk("k2")
            ]
        }))
        .unwrap();

        let set = KeySet::from_document(&doc);

        assert_eq!(set.len(), 2);
        assert!(set.get("k1").unwrap().supports(Algorithm::RS256));
        assert!(set.get("k2").is_some());
        assert!(set.get("hmac").is_none());
    }
}
