//! Per-client rate limiting.
//!
//! # Algorithm
//! ```text
//! window   = floor(now_ms / window_ms)
//! record   = store.increment(key, window)      (attempts, not successes)
//! fixed:   used = record.count
//! sliding: used = record.count + record.previous_count × (1 − elapsed / window_ms)
//! used > max_requests  → 429 + Retry-After, request dropped
//! otherwise            → forwarded unchanged
//! ```
//!
//! # Design Decisions
//! - Fixed window by default: a client may send `max` at the end of one window
//!   and `max` again at the start of the next. `sliding_window` removes most of
//!   that burst at the cost of a slightly fuzzier quota.
//! - A request landing exactly on `k × window_ms` belongs to window `k`.
//! - The check is synchronous; nothing here awaits or blocks on I/O.
//! - Store failures follow `store_failure`: open admits unmetered, closed
//!   answers 503.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::validation::validate_rate_limit;
use crate::config::{ConfigError, RateLimitAlgorithm, RateLimitConfig, StoreFailurePolicy};
use crate::observability::metrics;
use crate::security::client_key::{ClientKeyExtractor, UNKNOWN_CLIENT};
use crate::security::clock::{Clock, SystemClock};
use crate::security::store::{MemoryStore, StoreError, WindowRecord, WindowStore};

/// Quota state reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the current window ends.
    pub reset_at_ms: u64,
    /// Time left in the current window.
    pub reset_after: Duration,
    /// False when the store failed and the request was admitted unmetered.
    pub metered: bool,
}

/// Why the limiter refused a request.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry in {retry_after:?}")]
    Exceeded { quota: Quota, retry_after: Duration },

    #[error("rate limit store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

/// Whole seconds for `Retry-After`, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let ms = retry_after.as_millis() as u64;
    ms.div_ceil(1000).max(1)
}

/// Fixed-window (optionally sliding) request limiter with an injected store.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn WindowStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_clients", &self.store.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter. Invalid window or quota values are rejected here,
    /// before any request is seen.
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let errors = validate_rate_limit(&config);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        Ok(Self { config, store, clock })
    }

    /// A limiter over an in-process store and the wall clock.
    pub fn in_memory(config: RateLimitConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one attempt for `key` and decide.
    pub fn check(&self, key: &str) -> Result<Quota, RateLimitError> {
        let now = self.clock.now_ms();
        let window_ms = self.config.window_ms;
        let max = self.config.max_requests;
        let window = now / window_ms;
        let window_end = window.saturating_add(1).saturating_mul(window_ms);
        let reset_after = Duration::from_millis(window_end.saturating_sub(now));

        let record = match self.store.increment(key, window) {
            Ok(record) => record,
            Err(e) => {
                metrics::record_store_failure();
                return match self.config.store_failure {
                    StoreFailurePolicy::Open => {
                        tracing::warn!(client = %key, error = %e, "Window store failed, admitting unmetered");
                        Ok(Quota {
                            limit: max,
                            remaining: max,
                            reset_at_ms: window_end,
                            reset_after,
                            metered: false,
                        })
                    }
                    StoreFailurePolicy::Closed => {
                        tracing::error!(client = %key, error = %e, "Window store failed, rejecting");
                        Err(RateLimitError::StoreUnavailable(e))
                    }
                };
            }
        };

        let (exceeded, remaining, retry_after) = match self.config.algorithm {
            RateLimitAlgorithm::FixedWindow => (
                record.count > max,
                max.saturating_sub(record.count),
                reset_after,
            ),
            RateLimitAlgorithm::SlidingWindow => {
                let elapsed = now - window * window_ms;
                let used = sliding_usage(&record, elapsed, window_ms);
                let exceeded = used > max as f64;
                let retry_after = if exceeded {
                    sliding_retry_after(&record, elapsed, window_ms, max)
                } else {
                    reset_after
                };
                (exceeded, (max as f64 - used).floor().max(0.0) as u64, retry_after)
            }
        };

        let quota = Quota {
            limit: max,
            remaining,
            reset_at_ms: window_end,
            reset_after,
            metered: true,
        };

        if exceeded {
            Err(RateLimitError::Exceeded { quota, retry_after })
        } else {
            Ok(quota)
        }
    }

    /// Remove records that can no longer influence a decision.
    pub fn sweep(&self) -> usize {
        let window = self.clock.now_ms() / self.config.window_ms;
        let horizon = match self.config.algorithm {
            RateLimitAlgorithm::FixedWindow => window,
            // The previous window still weighs into the current one.
            RateLimitAlgorithm::SlidingWindow => window.saturating_sub(1),
        };
        self.store.sweep(horizon)
    }

    /// Forget everything counted for `key`.
    pub fn reset_key(&self, key: &str) {
        self.store.reset(key);
    }

    pub fn tracked_clients(&self) -> usize {
        self.store.len()
    }

    /// Write the configured quota headers onto a response.
    pub fn write_quota_headers(&self, headers: &mut HeaderMap, quota: &Quota) {
        if !quota.metered {
            return;
        }
        if self.config.legacy_headers {
            headers.insert("x-ratelimit-limit", HeaderValue::from(quota.limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(quota.remaining));
            headers.insert("x-ratelimit-reset", HeaderValue::from(quota.reset_at_ms.div_ceil(1000)));
        }
        if self.config.standard_headers {
            headers.insert("ratelimit-limit", HeaderValue::from(quota.limit));
            headers.insert("ratelimit-remaining", HeaderValue::from(quota.remaining));
            headers.insert("ratelimit-reset", HeaderValue::from(retry_after_secs(quota.reset_after)));
        }
    }

    /// Response sent in place of a refused request.
    pub fn rejection_response(&self, err: &RateLimitError) -> Response {
        match err {
            RateLimitError::Exceeded { quota, retry_after } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    self.config.message.clone(),
                )
                    .into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
                self.write_quota_headers(headers, quota);
                response
            }
            RateLimitError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
            )
                .into_response(),
        }
    }
}

/// Weighted attempt count for the sliding algorithm.
fn sliding_usage(record: &WindowRecord, elapsed: u64, window_ms: u64) -> f64 {
    let remaining_share = (window_ms - elapsed) as f64;
    record.count as f64 + record.previous_count as f64 * remaining_share / window_ms as f64
}

/// Earliest moment the next attempt would be admitted under the sliding
/// algorithm, assuming the client stays quiet until then.
fn sliding_retry_after(record: &WindowRecord, elapsed: u64, window_ms: u64, max: u64) -> Duration {
    let w = window_ms as f64;
    let elapsed = elapsed as f64;
    let prev = record.previous_count as f64;
    let count = record.count as f64;
    let max = max as f64;

    // Still inside this window: prev × (w − e) / w + count + 1 ≤ max
    let room = max - count - 1.0;
    if room >= 0.0 && prev > 0.0 {
        let needed = w - room * w / prev;
        if needed < w {
            return Duration::from_millis((needed - elapsed).ceil().max(1.0) as u64);
        }
    }

    // Next window: count × (w − t) / w + 1 ≤ max
    let into_next = if count > 0.0 {
        (w - (max - 1.0) * w / count).max(0.0)
    } else {
        0.0
    };
    Duration::from_millis((w - elapsed + into_next).ceil().max(1.0) as u64)
}

/// Shared state for the rate limit middleware.
#[derive(Clone, Debug)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub extractor: Arc<dyn ClientKeyExtractor>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, extractor: Arc<dyn ClientKeyExtractor>) -> Self {
        Self { limiter, extractor }
    }
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limiter = &state.limiter;
    if !limiter.config().enabled {
        return next.run(request).await;
    }

    let key = state
        .extractor
        .extract(&request)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    match limiter.check(&key) {
        Ok(quota) => {
            metrics::record_admitted();
            let mut response = next.run(request).await;
            limiter.write_quota_headers(response.headers_mut(), &quota);
            response
        }
        Err(err) => {
            match &err {
                RateLimitError::Exceeded { .. } => {
                    tracing::warn!(client = %key, error = %err, "Rate limit exceeded");
                    metrics::record_rate_limited("quota");
                }
                RateLimitError::StoreUnavailable(_) => {
                    metrics::record_rate_limited("store_unavailable");
                }
            }
            limiter.rejection_response(&err)
        }
    }
}

/// Periodically drop stale window records until shutdown.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    let period = Duration::from_millis(limiter.config().sweep_interval_ms());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        tracing::debug!(period_ms = period.as_millis() as u64, "Rate limit sweeper started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = limiter.sweep();
                    let tracked = limiter.tracked_clients();
                    metrics::record_tracked_clients(tracked);
                    if removed > 0 {
                        tracing::debug!(removed, tracked, "Swept stale rate limit records");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limit sweeper stopping");
                    break;
                }
            }
        }
    })
}
