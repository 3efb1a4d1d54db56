//! Redis rate limit store
//!
//! Uses Redis for distributed rate limiting across multiple instances.
//! Requires the `redis` feature to be enabled.

use crate::error::{RateLimitError, RateLimitResult};
use crate::stores::{RateLimitStore, WindowState};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

// KEYS[1] = log key
// ARGV = points, now_ms, window_ms
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local points = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

local count = redis.call('ZCARD', key)
local allowed = 0
if count < points then
    redis.call('ZADD', key, now, now .. '-' .. count)
    count = count + 1
    allowed = 1
end

local retry = 0
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
    retry = tonumber(oldest[2]) + window - now
    redis.call('PEXPIRE', key, window)
end

return {allowed, count, retry}
"#;

/// Redis-backed rate limit store
///
/// Each key is a sorted set of consumption timestamps. A Lua script prunes,
/// counts and appends in one round trip so concurrent callers never exceed
/// the budget.
pub struct RedisStore {
    /// Redis connection manager
    conn: ConnectionManager,
    script: redis::Script,
}

impl RedisStore {
    /// Create a store over an existing connection
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    /// Connect to Redis and create a store
    pub async fn connect(url: &str) -> RateLimitResult<Self> {
        debug!(url = %url, "Connecting to Redis for rate limiting");

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self::new(conn))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn consume(
        &self,
        key: &str,
        points: u64,
        window: Duration,
    ) -> RateLimitResult<WindowState> {
        trace!(key = %key, points = points, window = ?window, "Redis sliding window check");

        let mut conn = self.conn.clone();
        let (allowed, count, retry_ms): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(points)
            .arg(now_millis())
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::store(e.to_string()))?;

        Ok(WindowState {
            allowed: allowed == 1,
            count: count.max(0) as u64,
            retry_after: Duration::from_millis(retry_ms.max(0) as u64),
        })
    }

    async fn reset(&self, key: &str) -> RateLimitResult<()> {
        debug!(key = %key, "Resetting rate limit state in Redis");

        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| RateLimitError::store(e.to_string()))?;

        Ok(())
    }

    async fn cleanup(&self) -> RateLimitResult<()> {
        debug!("Redis cleanup is automatic via TTL");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    // Redis tests require a running Redis instance
    // Run with: cargo test -- --ignored

    use super::*;

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_sliding_window() {
        let store = RedisStore::connect("redis://localhost:6379").await.unwrap();
        store.reset("courier-test:sw").await.unwrap();

        let window = Duration::from_secs(60);

        for expected in 1..=3 {
            let state = store.consume("courier-test:sw", 3, window).await.unwrap();
            assert!(state.allowed);
            assert_eq!(state.count, expected);
        }

        let state = store.consume("courier-test:sw", 3, window).await.unwrap();
        assert!(!state.allowed);
        assert!(state.retry_after <= window);
        assert!(state.retry_after > Duration::ZERO);
    }

    #[tokio::test]
    #[ignore = "Requires running Redis instance"]
    async fn test_redis_concurrent_callers_share_budget() {
        let store = std::sync::Arc::new(RedisStore::connect("redis://localhost:6379").await.unwrap());
        store.reset("courier-test:concurrent").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .consume("courier-test:concurrent", 5, Duration::from_secs(60))
                    .await
                    .unwrap()
                    .allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }
}
