//! Builder patterns for test tokens.
//!
//! Defaults match the gate's test configuration: issuer `ISSUER`, audience
//! `AUDIENCE`, subject `VALID_TOKEN`, expiring 60 seconds from now.

use crate::keys::TestKeypair;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde_json::{json, Map, Value};

pub const TEST_ISSUER: &str = "ISSUER";
pub const TEST_AUDIENCE: &str = "AUDIENCE";
pub const TEST_SUBJECT: &str = "VALID_TOKEN";

/// Builder for test token claims.
///
/// # Example
/// ```rust,ignore
/// let token = TokenBuilder::new()
///     .subject("alice")
///     .expires_in(3600)
///     .sign(&keypair);
/// ```
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    claims: Map<String, Value>,
}

impl TokenBuilder {
    /// Create a new token builder with defaults.
    pub fn new() -> Self {
        let now = Utc::now().timestamp();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(TEST_ISSUER));
        claims.insert("aud".to_string(), json!(TEST_AUDIENCE));
        claims.insert("sub".to_string(), json!(TEST_SUBJECT));
        claims.insert("exp".to_string(), json!(now + 60));
        claims.insert("iat".to_string(), json!(now));
        Self { claims }
    }

    pub fn issuer(self, issuer: &str) -> Self {
        self.claim("iss", json!(issuer))
    }

    pub fn audience(self, audience: &str) -> Self {
        self.claim("aud", json!(audience))
    }

    /// Audience as a JSON array.
    pub fn audiences(self, audiences: &[&str]) -> Self {
        self.claim("aud", json!(audiences))
    }

    pub fn subject(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    /// Absolute expiry (Unix seconds).
    pub fn expires_at(self, exp: i64) -> Self {
        self.claim("exp", json!(exp))
    }

    /// Expiry relative to now, negative for already expired.
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expires_at(Utc::now().timestamp() + seconds)
    }

    pub fn not_before(self, nbf: i64) -> Self {
        self.claim("nbf", json!(nbf))
    }

    pub fn issued_at(self, iat: i64) -> Self {
        self.claim("iat", json!(iat))
    }

    /// Set or replace any claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Drop a claim, e.g. to build a token without `exp`.
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value.
    pub fn build(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// Sign with the keypair's algorithm and kid.
    pub fn sign(&self, keypair: &TestKeypair) -> String {
        keypair.sign_claims(&self.build())
    }

    /// Sign with an explicit kid (or none) in the header.
    pub fn sign_with_kid(&self, keypair: &TestKeypair, kid: Option<&str>) -> String {
        keypair.sign_claims_with_kid(&self.build(), kid)
    }

    /// A structurally valid token whose header names `alg` and whose
    /// signature is junk, for algorithm-confusion tests.
    pub fn unsigned_with_alg(&self, alg: &str, kid: &str) -> String {
        let header = json!({ "alg": alg, "kid": kid, "typ": "JWT" });
        format!(
            "{}.{}.{}",
            encode_json(&header),
            encode_json(&self.build()),
            URL_SAFE_NO_PAD.encode(b"not-a-signature")
        )
    }
}

impl Default for TokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_json(value: &Value) -> String {
    URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).expect("JSON serialization"))
}

fn segments(token: &str) -> (&str, &str, &str) {
    let mut parts = token.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s)) => (h, c, s),
        _ => panic!("token must have three segments"),
    }
}

/// Rewrite the header's `alg`, keeping claims and signature.
pub fn relabel_algorithm(token: &str, alg: &str) -> String {
    let (header, claims, signature) = segments(token);
    let mut header: Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).expect("header base64"))
            .expect("header JSON");
    header["alg"] = json!(alg);
    format!("{}.{}.{}", encode_json(&header), claims, signature)
}

/// Flip one bit of the signature.
pub fn tamper_signature(token: &str) -> String {
    let (header, claims, signature) = segments(token);
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).expect("signature base64");
    bytes[0] ^= 0x01;
    format!("{}.{}.{}", header, claims, URL_SAFE_NO_PAD.encode(bytes))
}

/// Replace the claims of `token` with those of `donor`, keeping the
/// original header and signature.
pub fn swap_claims(token: &str, donor: &str) -> String {
    let (header, _, signature) = segments(token);
    let (_, claims, _) = segments(donor);
    format!("{}.{}.{}", header, claims, signature)
}
