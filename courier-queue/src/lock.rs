//! Per-job locks keyed by message id
//!
//! A lease from the store already keeps two workers from dequeuing the same
//! job. The lock covers the case the lease cannot: a worker still
//! dispatching after its lease expired while another instance picks the
//! redelivered job up.

use crate::error::{QueueError, QueueResult};
use crate::job::MessageId;
use async_trait::async_trait;
use courier_redis::RedisHandles;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

// Delete only if the key still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Proof of a held lock, required to release it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    token: String,
}

impl LockToken {
    fn new(key: String) -> Self {
        Self {
            key,
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Lock key
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Mutual exclusion on a single job across worker instances
#[async_trait]
pub trait JobLock: Send + Sync {
    /// Take the lock for `message_id` for at most `ttl`, or `None` if held.
    async fn try_acquire(
        &self,
        message_id: MessageId,
        ttl: Duration,
    ) -> QueueResult<Option<LockToken>>;

    /// Release a lock. Returns `false` if it expired or changed hands.
    async fn release(&self, token: &LockToken) -> QueueResult<bool>;
}

/// [`JobLock`] over Redis `SET NX PX`
pub struct RedisJobLock {
    conn: ConnectionManager,
    prefix: String,
    release_script: redis::Script,
}

impl RedisJobLock {
    /// Create a new Redis job lock
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// use courier_queue::RedisJobLock;
    ///
    /// let lock = RedisJobLock::new(handles.locker.clone(), "courier");
    /// ```
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    /// Create a lock on the dedicated `locker` connection
    pub fn from_handles(handles: &RedisHandles, prefix: impl Into<String>) -> Self {
        Self::new(handles.locker.clone(), prefix)
    }

    fn key(&self, message_id: MessageId) -> String {
        format!("{}:lock:{}", self.prefix, message_id)
    }
}

#[async_trait]
impl JobLock for RedisJobLock {
    async fn try_acquire(
        &self,
        message_id: MessageId,
        ttl: Duration,
    ) -> QueueResult<Option<LockToken>> {
        let token = LockToken::new(self.key(message_id));
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(&token.key)
            .arg(&token.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        if result.is_some() {
            debug!(message_id = %message_id, "Acquired job lock");
            Ok(Some(token))
        } else {
            debug!(message_id = %message_id, "Job lock already held");
            Ok(None)
        }
    }

    async fn release(&self, token: &LockToken) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let result: i32 = self
            .release_script
            .key(&token.key)
            .arg(&token.token)
            .invoke_async(&mut conn)
            .await?;

        if result == 1 {
            debug!(key = %token.key, "Released job lock");
            Ok(true)
        } else {
            warn!(key = %token.key, "Job lock not held at release (expired)");
            Ok(false)
        }
    }
}

/// Single-process [`JobLock`]
#[derive(Default)]
pub struct MemoryJobLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryJobLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobLock for MemoryJobLock {
    async fn try_acquire(
        &self,
        message_id: MessageId,
        ttl: Duration,
    ) -> QueueResult<Option<LockToken>> {
        let token = LockToken::new(format!("lock:{message_id}"));
        let now = Instant::now();
        let mut held = self.held.lock().await;

        if let Some((_, expires)) = held.get(&token.key)
            && *expires > now
        {
            return Ok(None);
        }

        let expires = now
            .checked_add(ttl)
            .ok_or_else(|| QueueError::Lock(format!("ttl {ttl:?} out of range")))?;
        held.insert(token.key.clone(), (token.token.clone(), expires));
        Ok(Some(token))
    }

    async fn release(&self, token: &LockToken) -> QueueResult<bool> {
        let mut held = self.held.lock().await;
        match held.get(&token.key) {
            Some((owner, expires)) if *owner == token.token && *expires > Instant::now() => {
                held.remove(&token.key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
