//! Redis store backend.
//!
//! # Responsibilities
//! - Map the `CounterStore` primitives onto Redis commands
//! - Execute the sliding-window update as one server-side Lua script
//! - Reconnect transparently via `ConnectionManager`
//!
//! # Design Decisions
//! - One network round trip per primitive; no client-side pipelining of
//!   dependent reads and writes
//! - The script is the only cross-request serialization point; Redis runs
//!   scripts single-threaded, which supplies the atomicity the sliding
//!   window requires

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::store::{CounterStore, StoreError, WindowVerdict};

/// Prune, count, and conditionally append in one indivisible step.
///
/// KEYS[1] = window key; ARGV = [now_ms, window_ms, limit, entry_id].
/// Returns {admitted, count, oldest_ms}.
const WINDOW_UPDATE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count < limit then
    redis.call('ZADD', KEYS[1], now, ARGV[4])
    redis.call('PEXPIRE', KEYS[1], window * 2)
    return {1, count + 1, 0}
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {0, count, tonumber(oldest[2])}
"#;

/// Shared Redis-backed [`CounterStore`].
pub struct RedisStore {
    conn: ConnectionManager,
    window_script: Script,
}

impl RedisStore {
    /// Connect to Redis at the given URL (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::info!(url = %url, "Connected to counter store");
        Ok(Self {
            conn,
            window_script: Script::new(WINDOW_UPDATE_SCRIPT),
        })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(0)
        } else if err.kind() == redis::ErrorKind::ExtensionError {
            StoreError::Script(err.to_string())
        } else {
            StoreError::Connection(err.to_string())
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ttl_secs(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await?;
        // -1 = no expiry, -2 = missing key.
        Ok(if ttl >= 0 { Some(ttl as u64) } else { None })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let added: u64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added == 1)
    }

    async fn set_len(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("SCARD").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn atomic_window_update(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
        entry_id: &str,
    ) -> Result<WindowVerdict, StoreError> {
        let mut conn = self.conn.clone();
        let (admitted, count, oldest_ms): (u8, u64, u64) = self
            .window_script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(entry_id)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowVerdict {
            allowed: admitted == 1,
            count,
            oldest_ms: if admitted == 1 { None } else { Some(oldest_ms) },
        })
    }
}
