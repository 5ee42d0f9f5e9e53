//! Mock JWKS endpoint backed by wiremock.

use crate::keys::TestKeypair;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the JWKS document on.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A trust authority stand-in serving a JWKS document.
///
/// Each `serve_*` call replaces whatever was mounted before.
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URI of the JWKS endpoint.
    pub fn jwks_uri(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// JWKS document for the given keys.
    pub fn document(keys: &[&TestKeypair]) -> serde_json::Value {
        let keys: Vec<_> = keys.iter().map(|k| k.jwk_json()).collect();
        serde_json::json!({ "keys": keys })
    }

    /// Serve the given keys.
    pub async fn serve_keys(&self, keys: &[&TestKeypair]) {
        self.mount(ResponseTemplate::new(200).set_body_json(Self::document(keys)), None)
            .await;
    }

    /// Serve the given keys and verify on drop that the endpoint was hit
    /// exactly `times` times.
    pub async fn serve_keys_expecting(&self, keys: &[&TestKeypair], times: u64) {
        self.mount(
            ResponseTemplate::new(200).set_body_json(Self::document(keys)),
            Some(times),
        )
        .await;
    }

    /// Serve the given keys after a delay.
    pub async fn serve_keys_delayed(&self, keys: &[&TestKeypair], delay: Duration) {
        self.mount(
            ResponseTemplate::new(200)
                .set_body_json(Self::document(keys))
                .set_delay(delay),
            None,
        )
        .await;
    }

    /// Respond with a bare status code.
    pub async fn serve_status(&self, status: u16) {
        self.mount(ResponseTemplate::new(status), None).await;
    }

    /// Respond 200 with an arbitrary body.
    pub async fn serve_raw(&self, body: &str) {
        self.mount(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(body),
            None,
        )
        .await;
    }

    /// Number of requests the endpoint has received.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    async fn mount(&self, response: ResponseTemplate, expected: Option<u64>) {
        self.server.reset().await;

        let mock = Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response);
        let mock = match expected {
            Some(times) => mock.expect(times),
            None => mock,
        };
        mock.mount(&self.server).await;
    }
}
