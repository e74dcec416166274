//! Rate limiting against the shared counter store.
//!
//! Two interchangeable algorithms, selected per route:
//!
//! - **Fixed window**: one scalar counter per aligned time bucket. Cheap
//!   (2–3 round trips, no transaction) but a client can burst up to twice
//!   the limit across a bucket boundary. That overshoot is an accepted
//!   cost/precision tradeoff, not a bug to fix.
//! - **Sliding window**: an ordered log of request timestamps evaluated over
//!   the trailing window. Exact, at the cost of one scripted store
//!   transaction per check; prune/count/append must be a single atomic
//!   operation at the store or concurrent requests overshoot the limit.
//!
//! Store failures never reach the caller: every check fails open to an
//! allowed result and logs the failure.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::loader::ConfigError;
use crate::observability::metrics;
use crate::security::identity::ClientId;
use crate::store::{bounded, CounterStore, StoreError};
use crate::util::clock::Clock;

/// Counting algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    FixedWindow,
    SlidingWindow,
}

/// Immutable per-check configuration, validated at construction.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    limit: u32,
    window_secs: u64,
    identifier: ClientId,
    endpoint_key: String,
}

impl RateLimitConfig {
    /// Build a validated config. Rejects a zero limit or window.
    pub fn new(
        limit: u32,
        window_secs: u64,
        identifier: ClientId,
        endpoint_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidPolicy("limit must be greater than zero"));
        }
        if window_secs == 0 {
            return Err(ConfigError::InvalidPolicy(
                "window_secs must be greater than zero",
            ));
        }
        Ok(Self {
            limit,
            window_secs,
            identifier,
            endpoint_key: endpoint_key.into(),
        })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn identifier(&self) -> &ClientId {
        &self.identifier
    }

    pub fn endpoint_key(&self) -> &str {
        &self.endpoint_key
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds at which the window resets.
    pub reset_at_ms: u64,
}

/// Store-backed rate limiter. Holds no counts of its own; the external
/// store is the single source of truth across instances.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            store_timeout,
        }
    }

    /// Current time from the limiter's clock, for retry-timing math.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Check and count one request. Never errors: on store failure the
    /// request is admitted with a full window (fail-open).
    pub async fn check(&self, config: &RateLimitConfig, algorithm: Algorithm) -> RateLimitResult {
        let outcome = match algorithm {
            Algorithm::FixedWindow => self.check_fixed(config).await,
            Algorithm::SlidingWindow => self.check_sliding(config).await,
        };

        match outcome {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    client = %config.identifier,
                    endpoint = %config.endpoint_key,
                    algorithm = ?algorithm,
                    error = %err,
                    "Rate limit store failure, failing open"
                );
                metrics::record_store_failure("rate_limit");
                self.fail_open(config)
            }
        }
    }

    /// Fixed-window counter: INCR, set TTL on first increment, read TTL.
    async fn check_fixed(&self, config: &RateLimitConfig) -> Result<RateLimitResult, StoreError> {
        let now_ms = self.clock.now_ms();
        let bucket = (now_ms / 1000) / config.window_secs;
        let key = format!(
            "rl:fixed:{}:{}:{}",
            config.identifier, config.endpoint_key, bucket
        );

        let count = bounded(self.store_timeout, self.store.incr(&key)).await?;
        if count == 1 {
            bounded(
                self.store_timeout,
                self.store.expire(&key, config.window_secs),
            )
            .await?;
        }
        let ttl = bounded(self.store_timeout, self.store.ttl_secs(&key))
            .await?
            .unwrap_or(config.window_secs);

        let capped = count.min(u64::from(u32::MAX)) as u32;
        Ok(RateLimitResult {
            allowed: count <= u64::from(config.limit),
            remaining: config.limit.saturating_sub(capped),
            reset_at_ms: now_ms + ttl * 1000,
        })
    }

    /// Sliding-window log: one scripted transaction prunes entries older
    /// than the window, counts survivors, and conditionally appends.
    async fn check_sliding(&self, config: &RateLimitConfig) -> Result<RateLimitResult, StoreError> {
        let now_ms = self.clock.now_ms();
        let window_ms = config.window_secs * 1000;
        let key = format!("rl:slide:{}:{}", config.identifier, config.endpoint_key);
        // Unique member so two requests in the same millisecond both count.
        let entry_id = Uuid::new_v4().to_string();

        let verdict = bounded(
            self.store_timeout,
            self.store
                .atomic_window_update(&key, now_ms, window_ms, config.limit, &entry_id),
        )
        .await?;

        if verdict.allowed {
            let counted = verdict.count.min(u64::from(u32::MAX)) as u32;
            Ok(RateLimitResult {
                allowed: true,
                remaining: config.limit.saturating_sub(counted),
                reset_at_ms: now_ms + window_ms,
            })
        } else {
            // The window opens again one window past the oldest surviving
            // entry, not at an aligned boundary.
            let reset_at_ms = verdict.oldest_ms.unwrap_or(now_ms) + window_ms;
            Ok(RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at_ms,
            })
        }
    }

    fn fail_open(&self, config: &RateLimitConfig) -> RateLimitResult {
        RateLimitResult {
            allowed: true,
            remaining: config.limit,
            reset_at_ms: self.clock.now_ms() + config.window_secs * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::WindowVerdict;
    use crate::util::clock::ManualClock;
    use async_trait::async_trait;

    fn limiter_at(start_ms: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let limiter = RateLimiter::new(store, Arc::new(clock.clone()), Duration::from_millis(250));
        (limiter, clock)
    }

    fn config(limit: u32, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig::new(limit, window_secs, ClientId::new("203.0.113.7"), "search").unwrap()
    }

    #[test]
    fn test_config_rejects_zero_values() {
        assert!(RateLimitConfig::new(0, 60, ClientId::unknown(), "k").is_err());
        assert!(RateLimitConfig::new(3, 0, ClientId::unknown(), "k").is_err());
    }

    #[tokio::test]
    async fn test_fixed_window_counts_down_then_denies() {
        let (limiter, _clock) = limiter_at(0);
        let cfg = config(3, 60);

        for expected_remaining in [2, 1, 0] {
            let result = limiter.check(&cfg, Algorithm::FixedWindow).await;
            assert!(result.allowed);
            assert_eq!(result.remaining, expected_remaining);
        }

        let fourth = limiter.check(&cfg, Algorithm::FixedWindow).await;
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);
    }

    #[tokio::test]
    async fn test_fixed_window_resets_at_bucket_boundary() {
        let (limiter, clock) = limiter_at(0);
        let cfg = config(3, 60);

        for _ in 0..3 {
            assert!(limiter.check(&cfg, Algorithm::FixedWindow).await.allowed);
        }
        assert!(!limiter.check(&cfg, Algorithm::FixedWindow).await.allowed);

        // The adjacent bucket is an independent counter: the documented
        // boundary-burst tradeoff.
        clock.set_ms(60_000);
        for _ in 0..3 {
            assert!(limiter.check(&cfg, Algorithm::FixedWindow).await.allowed);
        }
    }

    #[tokio::test]
    async fn test_sliding_window_reset_tracks_oldest_entry() {
        let (limiter, clock) = limiter_at(0);
        let cfg = config(3, 60);

        for t_secs in [0u64, 1, 2] {
            clock.set_ms(t_secs * 1000);
            let result = limiter.check(&cfg, Algorithm::SlidingWindow).await;
            assert!(result.allowed, "call at t={t_secs}s should be admitted");
        }

        clock.set_ms(3_000);
        let denied = limiter.check(&cfg, Algorithm::SlidingWindow).await;
        assert!(!denied.allowed);
        // One window past the oldest admitted call (t=0), not the aligned
        // t=60s boundary a fixed window would report.
        assert_eq!(denied.reset_at_ms, 60_000);
    }

    #[tokio::test]
    async fn test_sliding_window_admits_after_oldest_expires() {
        let (limiter, clock) = limiter_at(0);
        let cfg = config(3, 60);

        for t_secs in [0u64, 1, 2] {
            clock.set_ms(t_secs * 1000);
            limiter.check(&cfg, Algorithm::SlidingWindow).await;
        }

        clock.set_ms(60_500);
        let result = limiter.check(&cfg, Algorithm::SlidingWindow).await;
        assert!(result.allowed);
    }

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn incr(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Connection("connection refused".to_string()))
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), StoreError> {
            Err(StoreError::Connection("connection refused".to_string()))
        }
        async fn ttl_secs(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Connection("connection refused".to_string()))
        }
        async fn set_add(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
            Err(StoreError::Connection("connection refused".to_string()))
        }
        async fn set_len(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Connection("connection refused".to_string()))
        }
        async fn atomic_window_update(
            &self,
            _key: &str,
            _now_ms: u64,
            _window_ms: u64,
            _limit: u32,
            _entry_id: &str,
        ) -> Result<WindowVerdict, StoreError> {
            Err(StoreError::Connection("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_open() {
        let clock = ManualClock::new(10_000);
        let limiter = RateLimiter::new(
            Arc::new(FailingStore),
            Arc::new(clock.clone()),
            Duration::from_millis(250),
        );
        let cfg = config(3, 60);

        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow] {
            let result = limiter.check(&cfg, algorithm).await;
            assert!(result.allowed);
            assert_eq!(result.remaining, 3);
            assert_eq!(result.reset_at_ms, 10_000 + 60_000);
        }
    }
}
