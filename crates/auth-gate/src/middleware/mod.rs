//! Middleware for the auth gate.
//!
//! # Components
//!
//! - `auth` - Applies the gate's decision to every request

pub mod auth;

pub use auth::{enforce_policy, AuthState, PrincipalExt};
