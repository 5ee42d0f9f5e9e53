//! JWKS client for fetching and caching the trust authority's public keys.
//!
//! [`HttpKeySource`] fetches the JWKS document from the configured URI.
//! [`KeyCache`] keeps the last good [`KeySet`] and refreshes it when a key ID
//! is missing or the entry is older than its TTL.
//!
//! # Concurrency
//!
//! - Readers clone an `Arc` of the current entry under a short read lock
//! - Refreshes are serialized by a mutex; callers that missed while a fetch
//!   was in flight share its outcome instead of fetching again
//! - A fetcher that is cancelled mid-flight records no attempt, so the next
//!   waiter fetches on its own instead of waiting forever
//!
//! # Security
//!
//! - Fetches are bounded by a timeout
//! - A failed refresh never replaces the cached set, and stale keys that are
//!   already known keep working while the authority is unreachable
//! - Unknown-kid refetches can be throttled with `min_refresh_interval`

use crate::auth::keys::{JwksDocument, KeySet, VerificationKey};
use crate::observability::metrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Default fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Errors resolving a verification key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("JWKS fetch failed: {0}")]
    FetchFailed(String),

    #[error("JWKS fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("JWKS document is invalid: {0}")]
    InvalidDocument(String),

    #[error("no trusted key with id {0}")]
    UnknownKey(String),
}

/// Where trusted keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the current JWKS document.
    async fn fetch(&self) -> Result<JwksDocument, KeyError>;
}

/// Fetches the JWKS document over HTTP.
pub struct HttpKeySource {
    /// URL to the JWKS endpoint.
    jwks_uri: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a new HTTP key source.
    ///
    /// # Arguments
    ///
    /// * `jwks_uri` - URL of the authority's JWKS document
    /// * `timeout` - Upper bound for a single fetch
    pub fn new(jwks_uri: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gate.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_uri,
            http_client,
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    #[instrument(skip(self), fields(uri = %self.jwks_uri))]
    async fn fetch(&self) -> Result<JwksDocument, KeyError> {
        tracing::debug!(target: "gate.auth.jwks", url = %self.jwks_uri, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gate.auth.jwks", error = %e, "Failed to fetch JWKS");
                KeyError::FetchFailed(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "gate.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(KeyError::FetchFailed(format!(
                "status {}",
                response.status()
            )));
        }

        response.json::<JwksDocument>().await.map_err(|e| {
            tracing::error!(target: "gate.auth.jwks", error = %e, "Failed to parse JWKS response");
            KeyError::InvalidDocument(e.to_string())
        })
    }
}

/// A fetched key set with its age.
#[derive(Debug)]
pub struct CacheEntry {
    keys: KeySet,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn keys(&self) -> &KeySet {
        &self.keys
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Cache tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCacheSettings {
    /// How long a fetched key set is trusted without refreshing.
    pub ttl: Duration,

    /// Upper bound for one fetch from the key source.
    pub fetch_timeout: Duration,

    /// Minimum time between fetches caused by unknown key IDs while the
    /// cached set is still fresh.
    pub min_refresh_interval: Duration,
}

impl Default for KeyCacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
            min_refresh_interval: Duration::ZERO,
        }
    }
}

/// Outcome of the most recent completed fetch. Guarded by the refresh mutex.
#[derive(Default)]
struct RefreshState {
    last_attempt_at: Option<Instant>,
    last_error: Option<KeyError>,
}

/// Verification key cache with coalesced refreshes.
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    current: RwLock<Option<Arc<CacheEntry>>>,
    refresh: Mutex<RefreshState>,
    /// Bumped after every completed fetch, success or failure.
    completed_fetches: AtomicU64,
    settings: KeyCacheSettings,
}

impl KeyCache {
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self::with_settings(source, KeyCacheSettings::default())
    }

    pub fn with_settings(source: Arc<dyn KeySource>, settings: KeyCacheSettings) -> Self {
        Self {
            source,
            current: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
            completed_fetches: AtomicU64::new(0),
            settings,
        }
    }

    /// Current cache entry, if any fetch has succeeded.
    pub async fn current(&self) -> Option<Arc<CacheEntry>> {
        self.current.read().await.clone()
    }

    /// Resolve a verification key by key ID.
    ///
    /// Returns the cached key when the entry is fresh. Otherwise refreshes
    /// from the key source first.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::UnknownKey` if the key ID is not in the refreshed set,
    /// or the fetch error if the refresh failed and no cached key matches.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> Result<Arc<VerificationKey>, KeyError> {
        // Read the counter before the entry: a fetch that completes after
        // this point is visible to refresh_for as a changed counter.
        let observed = self.completed_fetches.load(Ordering::Acquire);

        if let Some(entry) = self.current().await {
            if entry.is_fresh() {
                if let Some(key) = entry.keys().get(kid) {
                    tracing::debug!(target: "gate.auth.jwks", kid = %kid, "JWKS cache hit");
                    metrics::record_jwks_cache("hit");
                    return Ok(key);
                }
                tracing::debug!(target: "gate.auth.jwks", kid = %kid, "Key not found in JWKS cache");
            }
        }

        metrics::record_jwks_cache("miss");
        self.refresh_for(kid, observed).await
    }

    /// Refresh the cache unconditionally.
    ///
    /// Returns the number of usable keys in the new set.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; the previous entry is kept.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, KeyError> {
        let mut state = self.refresh.lock().await;
        let entry = self.fetch_locked(&mut state).await?;
        Ok(entry.keys().len())
    }

    async fn refresh_for(&self, kid: &str, observed: u64) -> Result<Arc<VerificationKey>, KeyError> {
        let mut state = self.refresh.lock().await;
        let previous = self.current().await;

        if self.completed_fetches.load(Ordering::Acquire) != observed {
            // Another caller fetched while we waited; share its outcome
            tracing::debug!(target: "gate.auth.jwks", kid = %kid, "Using result of concurrent JWKS refresh");
            if let Some(key) = previous.as_ref().and_then(|e| e.keys().get(kid)) {
                return Ok(key);
            }
            return Err(state
                .last_error
                .clone()
                .unwrap_or_else(|| KeyError::UnknownKey(kid.to_string())));
        }

        if let (Some(entry), Some(last_attempt)) = (previous.as_ref(), state.last_attempt_at) {
            if last_attempt.elapsed() < self.settings.min_refresh_interval {
                if entry.is_fresh() {
                    tracing::debug!(target: "gate.auth.jwks", kid = %kid, "Unknown key ID, JWKS refresh throttled");
                    return Err(KeyError::UnknownKey(kid.to_string()));
                }

                // Expired entry and the last attempt failed: no refetch until
                // the throttle window passes
                if let Some(err) = state.last_error.as_ref() {
                    tracing::debug!(target: "gate.auth.jwks", kid = %kid, error = %err, "JWKS refresh throttled after failure");
                    return entry.keys().get(kid).ok_or_else(|| err.clone());
                }
            }
        }

        match self.fetch_locked(&mut state).await {
            Ok(entry) => entry.keys().get(kid).ok_or_else(|| {
                tracing::warn!(target: "gate.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
                KeyError::UnknownKey(kid.to_string())
            }),
            Err(err) => match previous.as_ref().and_then(|e| e.keys().get(kid)) {
                Some(stale) => {
                    tracing::warn!(
                        target: "gate.auth.jwks",
                        kid = %kid,
                        error = %err,
                        age_secs = previous.as_ref().map_or(0, |e| e.fetched_at().elapsed().as_secs()),
                        "JWKS refresh failed, using stale key"
                    );
                    Ok(stale)
                }
                None => Err(err),
            },
        }
    }

    /// Fetch and publish a new entry. Caller holds the refresh mutex.
    async fn fetch_locked(&self, state: &mut RefreshState) -> Result<Arc<CacheEntry>, KeyError> {
        let started = Instant::now();
        let fetched =
            match tokio::time::timeout(self.settings.fetch_timeout, self.source.fetch()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        target: "gate.auth.jwks",
                        timeout_ms = self.settings.fetch_timeout.as_millis() as u64,
                        "JWKS fetch timed out"
                    );
                    Err(KeyError::Timeout(self.settings.fetch_timeout))
                }
            };
        state.last_attempt_at = Some(Instant::now());

        let outcome = match fetched {
            Ok(document) => {
                let entry = Arc::new(CacheEntry {
                    keys: KeySet::from_document(&document),
                    fetched_at: Instant::now(),
                    ttl: self.settings.ttl,
                });
                if entry.keys().is_empty() {
                    tracing::warn!(target: "gate.auth.jwks", "JWKS contains no usable keys");
                }
                *self.current.write().await = Some(Arc::clone(&entry));
                state.last_error = None;

                tracing::info!(
                    target: "gate.auth.jwks",
                    key_count = entry.keys().len(),
                    key_ids = ?entry.keys().key_ids().collect::<Vec<_>>(),
                    "JWKS cache refreshed"
                );
                metrics::record_jwks_fetch("success", started.elapsed());
                Ok(entry)
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                metrics::record_jwks_fetch("error", started.elapsed());
                Err(err)
            }
        };

        self.completed_fetches.fetch_add(1, Ordering::Release);
        outcome
    }
}
