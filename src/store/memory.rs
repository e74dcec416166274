//! In-memory store backend.
//!
//! Single-process substitute for the shared Redis store, used by tests and
//! single-node deployments. Keys live in one `DashMap`; every operation on a
//! key runs under that key's shard lock, which gives the sliding-window
//! update the same observable atomicity as the Redis script: concurrent
//! updates to one key are serialized end-to-end.
//!
//! Expiry is lazy. A record past its deadline is treated as absent on the
//! next access, mirroring TTL-driven eviction in the real store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::store::{CounterStore, StoreError, WindowVerdict};
use crate::util::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    Set(HashSet<String>),
    /// Ordered (timestamp, entry id) log; insertion order is time order
    /// because timestamps are monotone per key.
    Window(Vec<(u64, String)>),
}

#[derive(Debug, Clone)]
struct Record {
    value: Value,
    expires_at_ms: Option<u64>,
}

impl Record {
    fn expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(at) if at <= now_ms)
    }
}

/// In-process [`CounterStore`] implementation.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    records: DashMap<String, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a store that reads time from the given clock. Tests pass a
    /// `ManualClock` here to fast-forward TTLs.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: DashMap::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.expired(now) {
                    *record = Record {
                        value: Value::Counter(1),
                        expires_at_ms: None,
                    };
                    return Ok(1);
                }
                match &mut record.value {
                    Value::Counter(n) => {
                        *n += 1;
                        Ok(*n)
                    }
                    _ => Err(StoreError::Unexpected(format!(
                        "INCR on non-counter key {key}"
                    ))),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Record {
                    value: Value::Counter(1),
                    expires_at_ms: None,
                });
                Ok(1)
            }
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        if let Some(mut record) = self.records.get_mut(key) {
            if !record.expired(now) {
                record.expires_at_ms = Some(now + ttl_secs * 1000);
            }
        }
        Ok(())
    }

    async fn ttl_secs(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now_ms();
        let Some(record) = self.records.get(key) else {
            return Ok(None);
        };
        if record.expired(now) {
            return Ok(None);
        }
        Ok(record
            .expires_at_ms
            .map(|at| (at.saturating_sub(now) + 999) / 1000))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        match self.records.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.expired(now) {
                    let mut members = HashSet::new();
                    members.insert(member.to_string());
                    *record = Record {
                        value: Value::Set(members),
                        expires_at_ms: None,
                    };
                    return Ok(true);
                }
                match &mut record.value {
                    Value::Set(members) => Ok(members.insert(member.to_string())),
                    _ => Err(StoreError::Unexpected(format!(
                        "SADD on non-set key {key}"
                    ))),
                }
            }
            Entry::Vacant(vacant) => {
                let mut members = HashSet::new();
                members.insert(member.to_string());
                vacant.insert(Record {
                    value: Value::Set(members),
                    expires_at_ms: None,
                });
                Ok(true)
            }
        }
    }

    async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();
        let Some(record) = self.records.get(key) else {
            return Ok(0);
        };
        if record.expired(now) {
            return Ok(0);
        }
        match &record.value {
            Value::Set(members) => Ok(members.len() as u64),
            _ => Err(StoreError::Unexpected(format!(
                "SCARD on non-set key {key}"
            ))),
        }
    }

    async fn atomic_window_update(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        entry_id: &str,
    ) -> Result<WindowVerdict, StoreError> {
        // Signed so a window reaching before the epoch (tests start at t=0)
        // prunes nothing.
        let cutoff = now_ms as i64 - window_ms as i64;

        // The entry guard holds the shard write lock for the whole
        // prune/count/append sequence, which is the serialization point the
        // sliding-window contract requires.
        let mut guard = self.records.entry(key.to_string()).or_insert(Record {
            value: Value::Window(Vec::new()),
            expires_at_ms: None,
        });
        let record = guard.value_mut();
        if record.expired(now_ms) {
            *record = Record {
                value: Value::Window(Vec::new()),
                expires_at_ms: None,
            };
        }
        let Value::Window(entries) = &mut record.value else {
            return Err(StoreError::Unexpected(format!(
                "window update on non-window key {key}"
            )));
        };

        entries.retain(|(ts, _)| *ts as i64 > cutoff);
        let count = entries.len() as u64;
        if count < u64::from(limit) {
            entries.push((now_ms, entry_id.to_string()));
            record.expires_at_ms = Some(now_ms + window_ms * 2);
            return Ok(WindowVerdict {
                allowed: true,
                count: count + 1,
                oldest_ms: None,
            });
        }

        let oldest_ms = entries.first().map(|(ts, _)| *ts);
        Ok(WindowVerdict {
            allowed: false,
            count,
            oldest_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;

    fn store_at(start_ms: u64) -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(start_ms);
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_incr_and_ttl_lifecycle() {
        let (store, clock) = store_at(10_000);

        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert_eq!(store.ttl_secs("c").await.unwrap(), None);

        store.expire("c", 60).await.unwrap();
        assert_eq!(store.ttl_secs("c").await.unwrap(), Some(60));

        clock.advance_secs(61);
        assert_eq!(store.ttl_secs("c").await.unwrap(), None);
        // Expired key restarts from 1.
        assert_eq!(store.incr("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_cardinality_counts_distinct_members() {
        let (store, _clock) = store_at(0);

        assert!(store.set_add("s", "a").await.unwrap());
        assert!(store.set_add("s", "b").await.unwrap());
        assert!(!store.set_add("s", "a").await.unwrap());
        assert_eq!(store.set_len("s").await.unwrap(), 2);
        assert_eq!(store.set_len("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_window_update_prunes_and_denies() {
        let (store, _clock) = store_at(0);

        for i in 0..3u64 {
            let verdict = store
                .atomic_window_update("w", i * 1000, 60_000, 3, &format!("e{i}"))
                .await
                .unwrap();
            assert!(verdict.allowed);
            assert_eq!(verdict.count, i + 1);
        }

        let denied = store
            .atomic_window_update("w", 3_000, 60_000, 3, "e3")
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
        assert_eq!(denied.oldest_ms, Some(0));

        // One window later the oldest entries are pruned and space opens up.
        let later = store
            .atomic_window_update("w", 62_500, 60_000, 3, "e4")
            .await
            .unwrap();
        assert!(later.allowed);
    }
}
