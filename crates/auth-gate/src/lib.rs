//! Auth Gate Library
//!
//! An HTTP bearer-token authentication gate. For every inbound request it
//! decides from the path whether proof of identity is needed and, if so,
//! checks that the caller presents a valid, unexpired, correctly signed
//! token from the trusted authority.
//!
//! # Architecture
//!
//! ```text
//! request -> PolicyEngine -> bearer token -> TokenParser
//!         -> SignatureVerifier (KeyCache -> KeySource on miss)
//!         -> ClaimsValidator -> Decision
//! ```
//!
//! # Modules
//!
//! - `auth` - Key handling, signature and claim validation
//! - `policy` - Path-based access policy
//! - `gate` - The per-request decision pipeline
//! - `config` - Service configuration from environment
//! - `errors` - Denials mapped to HTTP responses
//! - `middleware` - Axum middleware applying the gate
//! - `handlers` - HTTP request handlers
//! - `routes` - Axum router setup
//! - `tasks` - Background JWKS refresh
//! - `observability` - Metrics

pub mod auth;
pub mod config;
pub mod errors;
pub mod gate;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod policy;
pub mod routes;
pub mod tasks;

pub use gate::{AuthGate, AuthRequest, Decision, DenyReason, Principal};
pub use policy::{Policy, PolicyEngine, Requirement};
