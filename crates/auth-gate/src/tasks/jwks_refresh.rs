//! JWKS refresh background task.
//!
//! Refreshes the key cache on a fixed period so requests rarely pay for a
//! fetch. Failures are logged and the cached keys stay in place.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered.

use crate::auth::jwks::KeyCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Start the JWKS refresh background task.
///
/// The first refresh runs immediately, warming the cache before traffic
/// arrives.
///
/// # Arguments
///
/// * `cache` - Key cache to refresh
/// * `interval` - Time between refreshes
/// * `cancel_token` - Token for graceful shutdown
#[instrument(skip_all, name = "gate.task.jwks_refresh")]
pub async fn start_jwks_refresh(
    cache: Arc<KeyCache>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "gate.task.jwks_refresh",
        interval_seconds = interval.as_secs(),
        "Starting JWKS refresh task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match cache.refresh().await {
                    Ok(key_count) => {
                        tracing::debug!(
                            target: "gate.task.jwks_refresh",
                            key_count,
                            "Background JWKS refresh complete"
                        );
                    }
                    Err(e) => {
                        // Keep going - the authority might recover
                        warn!(
                            target: "gate.task.jwks_refresh",
                            error = %e,
                            "Background JWKS refresh failed"
                        );
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "gate.task.jwks_refresh",
                    "JWKS refresh task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "gate.task.jwks_refresh", "JWKS refresh task stopped");
}
