//! Signing keypairs for tests.
//!
//! Each [`TestKeypair`] can sign tokens and describe its public half as a
//! JWK, ready to be served from a mock JWKS endpoint.
//!
//! - Ed25519 keys are deterministic from a seed
//! - RSA keys share one lazily generated 2048-bit key (generation is slow)
//! - ES256 keys are freshly generated

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use std::sync::OnceLock;

/// Shared RSA key material: (private key PEM, n, e), base64url.
static RSA_KEY: OnceLock<(String, String, String)> = OnceLock::new();

fn shared_rsa_key() -> &'static (String, String, String) {
    RSA_KEY.get_or_init(|| {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("RSA key generation");
        let pem = key
            .to_pkcs1_pem(Default::default())
            .expect("RSA key PEM encoding");
        (
            pem.as_str().to_string(),
            URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        )
    })
}

/// A signing key and the JWK that verifies it.
pub struct TestKeypair {
    kid: String,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    jwk: serde_json::Value,
}

impl TestKeypair {
    /// Deterministic Ed25519 keypair. The same seed always produces the
    /// same key.
    pub fn ed25519(seed: u8, kid: &str) -> Self {
        let mut seed_bytes = [0u8; 32];
        seed_bytes[0] = seed;
        for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
            *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
        }

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .expect("Failed to create test keypair");
        let public_key = key_pair.public_key().as_ref().to_vec();

        Self {
            kid: kid.to_string(),
            algorithm: Algorithm::EdDSA,
            encoding_key: EncodingKey::from_ed_der(&build_pkcs8_from_seed(&seed_bytes)),
            jwk: serde_json::json!({
                "kty": "OKP",
                "kid": kid,
                "crv": "Ed25519",
                "x": URL_SAFE_NO_PAD.encode(public_key),
                "alg": "EdDSA",
                "use": "sig"
            }),
        }
    }

    /// RS256 keypair backed by the shared RSA key.
    pub fn rsa(kid: &str) -> Self {
        let (pem, n, e) = shared_rsa_key();

        Self {
            kid: kid.to_string(),
            algorithm: Algorithm::RS256,
            encoding_key: EncodingKey::from_rsa_pem(pem.as_bytes())
                .expect("RSA encoding key"),
            jwk: serde_json::json!({
                "kty": "RSA",
                "kid": kid,
                "n": n,
                "e": e,
                "alg": "RS256",
                "use": "sig"
            }),
        }
    }

    /// Fresh ES256 (P-256) keypair.
    pub fn es256(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("P-256 key generation");
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .expect("P-256 key parsing");

        // Uncompressed point: 0x04 || x || y
        let point = key_pair.public_key().as_ref();
        let (x, y) = point[1..].split_at(32);

        Self {
            kid: kid.to_string(),
            algorithm: Algorithm::ES256,
            encoding_key: EncodingKey::from_ec_der(pkcs8.as_ref()),
            jwk: serde_json::json!({
                "kty": "EC",
                "kid": kid,
                "crv": "P-256",
                "x": URL_SAFE_NO_PAD.encode(x),
                "y": URL_SAFE_NO_PAD.encode(y),
                "alg": "ES256",
                "use": "sig"
            }),
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Public JWK for this key.
    pub fn jwk_json(&self) -> serde_json::Value {
        self.jwk.clone()
    }

    /// Sign arbitrary claims with this key's algorithm and kid.
    pub fn sign_claims(&self, claims: &serde_json::Value) -> String {
        self.sign_claims_with_kid(claims, Some(&self.kid))
    }

    /// Sign claims with an explicit (or missing) kid in the header.
    pub fn sign_claims_with_kid(&self, claims: &serde_json::Value, kid: Option<&str>) -> String {
        let mut header = Header::new(self.algorithm);
        header.typ = Some("JWT".to_string());
        header.kid = kid.map(str::to_string);

        jsonwebtoken::encode(&header, claims, &self.encoding_key).expect("Failed to sign token")
    }
}

/// Build PKCS#8 v1 document from Ed25519 seed.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier: SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // PrivateKey: OCTET STRING { OCTET STRING (32 byte seed) }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_is_deterministic() {
        let a = TestKeypair::ed25519(7, "k");
        let b = TestKeypair::ed25519(7, "k");
        let c = TestKeypair::ed25519(8, "k");

        assert_eq!(a.jwk_json(), b.jwk_json());
        assert_ne!(a.jwk_json()["x"], c.jwk_json()["x"]);
    }

    #[test]
    fn test_rsa_keys_share_material() {
        let a = TestKeypair::rsa("a");
        let b = TestKeypair::rsa("b");

        assert_eq!(a.jwk_json()["n"], b.jwk_json()["n"]);
        assert_eq!(a.jwk_json()["e"], "AQAB");
        assert_eq!(b.jwk_json()["kid"], "b");
    }

    #[test]
    fn test_es256_jwk_coordinates() {
        let key = TestKeypair::es256("ec");
        let jwk = key.jwk_json();

        let x = URL_SAFE_NO_PAD.decode(jwk["x"].as_str().unwrap()).unwrap();
        let y = URL_SAFE_NO_PAD.decode(jwk["y"].as_str().unwrap()).unwrap();
        assert_eq!(x.len(), 32);
        assert_eq!(y.len(), 32);
    }

    #[test]
    fn test_algorithm_matches_jwk() {
        for (key, alg) in [
            (TestKeypair::ed25519(1, "ed"), Algorithm::EdDSA),
            (TestKeypair::rsa("rsa"), Algorithm::RS256),
            (TestKeypair::es256("ec"), Algorithm::ES256),
        ] {
            assert_eq!(key.algorithm(), alg);
            assert_eq!(key.jwk_json()["alg"], format!("{:?}", alg));
        }
    }

    #[test]
    fn test_signed_token_has_three_segments() {
        let key = TestKeypair::ed25519(1, "k");
        let token = key.sign_claims(&serde_json::json!({"sub": "x"}));

        assert_eq!(token.split('.').count(), 3);
    }
}
