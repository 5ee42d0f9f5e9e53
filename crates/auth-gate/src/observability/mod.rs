//! Observability for the auth gate.
//!
//! Provides metrics definitions and the Prometheus recorder setup.

pub mod metrics;
