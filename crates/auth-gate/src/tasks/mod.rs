//! Background tasks for the auth gate.
//!
//! # Tasks
//!
//! - `jwks_refresh` - Periodically refreshes the key cache ahead of expiry

pub mod jwks_refresh;

pub use jwks_refresh::start_jwks_refresh;
