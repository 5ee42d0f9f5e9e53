//! HTTP request handlers for the auth gate.

pub mod example;
pub mod health;
pub mod metrics;

pub use example::{secure_example, unsecure_example};
pub use health::health_check;
pub use metrics::metrics_handler;
