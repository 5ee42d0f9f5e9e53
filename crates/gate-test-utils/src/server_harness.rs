//! Test server harness for E2E testing
//!
//! Provides `TestGateServer` for spawning real gate instances in tests.

use auth_gate::config::Config;
use auth_gate::observability::metrics::init_metrics_recorder;
use auth_gate::routes::{self, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

/// The global recorder can only be installed once per process; every
/// server in a test binary shares this handle.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Test harness for spawning the auth gate in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_e2e() -> Result<()> {
///     let jwks = MockJwksServer::start().await;
///     let server = TestGateServer::spawn(&jwks.jwks_uri()).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGateServer {
    addr: SocketAddr,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestGateServer {
    /// Configuration every test server starts from: the test issuer and
    /// audience, the given JWKS URI and the default policy.
    pub fn base_vars(jwks_uri: &str) -> HashMap<String, String> {
        HashMap::from([
            ("EXPECTED_ISSUER".to_string(), crate::TEST_ISSUER.to_string()),
            (
                "EXPECTED_AUDIENCE".to_string(),
                crate::TEST_AUDIENCE.to_string(),
            ),
            ("JWKS_URI".to_string(), jwks_uri.to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("GATE_DRAIN_SECONDS".to_string(), "0".to_string()),
        ])
    }

    /// Spawn a gate trusting the given JWKS endpoint.
    pub async fn spawn(jwks_uri: &str) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(Self::base_vars(jwks_uri)).await
    }

    /// Spawn a gate from an explicit environment table.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(vars: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let state = Arc::new(AppState::from_config(config.clone()));

        // Build routes using the gate's real route builder
        let app = routes::build_routes(state, metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestGateServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
