//! Common utilities and types shared across the auth gate crates.

#![warn(clippy::pedantic)]

/// Module for JWT wire-format parsing (size limits, header, claims)
pub mod jwt;
