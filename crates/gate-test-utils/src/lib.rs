//! # Gate Test Utilities
//!
//! Shared test utilities for the auth gate.
//!
//! This crate provides:
//! - Signing keypairs with matching JWKs (`TestKeypair`)
//! - Token builders and tampering helpers (`TokenBuilder`)
//! - A mock JWKS endpoint (`MockJwksServer`)
//! - Server test harness (`TestGateServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gate_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let keypair = TestKeypair::rsa("key-1");
//!     let jwks = MockJwksServer::start().await;
//!     jwks.serve_keys(&[&keypair]).await;
//!
//!     let server = TestGateServer::spawn(&jwks.jwks_uri()).await?;
//!     let token = TokenBuilder::new().sign(&keypair);
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/example", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod jwks_server;
pub mod keys;
pub mod server_harness;
pub mod tokens;

// Re-export commonly used items
pub use jwks_server::*;
pub use keys::*;
pub use server_harness::*;
pub use tokens::*;
