//! Shared counter store abstraction.
//!
//! # Data Flow
//! ```text
//! RateLimiter / BehaviorDetector
//!     → CounterStore trait (incr, expire, ttl, set ops, atomic window update)
//!     → RedisStore (production, cross-instance)
//!     → MemoryStore (tests / single node, same atomicity guarantee)
//! ```
//!
//! # Design Decisions
//! - The store is the single source of truth; callers hold no local counts
//! - Injected as `Arc<dyn CounterStore>` so tests substitute a fake
//! - The sliding-window update is one store-side atomic operation, never
//!   a client-side read-then-write

pub mod memory;
pub mod redis;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors raised by store backends. Internal only: every call site converts
/// these into a fail-open result instead of surfacing them to the request.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection establishment or I/O failure.
    #[error("store connection error: {0}")]
    Connection(String),

    /// The operation exceeded its deadline.
    #[error("store operation timed out after {0}ms")]
    Timeout(u64),

    /// Server-side script execution failed.
    #[error("store script error: {0}")]
    Script(String),

    /// Reply did not match the expected shape.
    #[error("unexpected store reply: {0}")]
    Unexpected(String),
}

/// Outcome of the atomic sliding-window update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowVerdict {
    /// Whether the new entry was appended.
    pub allowed: bool,
    /// Entries in the window, including the new one when admitted.
    pub count: u64,
    /// Timestamp of the oldest surviving entry, present on denial.
    pub oldest_ms: Option<u64>,
}

/// Minimal primitive set every backend must provide (atomic increment,
/// expiry control, set membership, and one scripted multi-step transaction).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment a scalar counter, creating it at 1.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Set or refresh a key's time-to-live.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Remaining time-to-live in seconds, `None` if the key is absent or
    /// has no expiry.
    async fn ttl_secs(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Add a member to a set; returns whether it was newly inserted.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Cardinality of a set (0 if absent).
    async fn set_len(&self, key: &str) -> Result<u64, StoreError>;

    /// Atomic sliding-window update: prune entries older than
    /// `now_ms - window_ms`, count survivors, and either append `entry_id`
    /// at `now_ms` (refreshing the key TTL to twice the window) or deny.
    /// All four steps execute as one indivisible operation at the store.
    async fn atomic_window_update(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        entry_id: &str,
    ) -> Result<WindowVerdict, StoreError>;
}

/// Bound a store call with a fixed timeout. A slow store must never hang the
/// request; the caller treats `Timeout` like any other store failure.
pub async fn bounded<T, F>(timeout: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let ok = bounded(Duration::from_millis(50), async { Ok::<_, StoreError>(7u64) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let slow = bounded(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(0u64)
        })
        .await;
        assert!(matches!(slow, Err(StoreError::Timeout(_))));
    }
}
