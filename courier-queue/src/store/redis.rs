//! Redis queue store
//!
//! Per queue, under `{prefix}:{queue}:`:
//!
//! - `pending`: list of ready message ids, head first
//! - `processing`: sorted set of leased ids scored by lease deadline (ms)
//! - `delayed`: sorted set of retrying ids scored by due time (ms)
//! - `jobs`: hash of message id to delivery record JSON
//! - `stalls`: hash of message id to lease expiries since the record was
//!   last written; added to `attempts` on dequeue
//! - `dead`: list of dead letter JSON, newest first

use crate::error::{QueueError, QueueResult};
use crate::job::{DeadLetter, JobState, MessageId, QueuedJob};
use crate::store::{QueueStore, ensure_pending, redriven};
use async_trait::async_trait;
use courier_redis::RedisHandles;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

// KEYS = pending, processing, delayed, jobs, stalls
// ARGV = now_ms, lease_deadline_ms
// Returns {record, stalls} or false.
const DEQUEUE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])

local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for i = #expired, 1, -1 do
    redis.call('ZREM', KEYS[2], expired[i])
    redis.call('HINCRBY', KEYS[5], expired[i], 1)
    redis.call('LPUSH', KEYS[1], expired[i])
end

local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[3], id)
    redis.call('RPUSH', KEYS[1], id)
end

while true do
    local id = redis.call('LPOP', KEYS[1])
    if not id then
        return false
    end
    local record = redis.call('HGET', KEYS[4], id)
    if record then
        redis.call('ZADD', KEYS[2], ARGV[2], id)
        local stalls = tonumber(redis.call('HGET', KEYS[5], id) or '0')
        return {record, stalls}
    end
end
"#;

/// Durable [`QueueStore`] over Redis.
///
/// Dequeue runs as a single Lua script so concurrent workers on any number
/// of hosts never lease the same job twice.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
    prefix: String,
    dequeue_script: redis::Script,
}

impl RedisQueueStore {
    /// Create a store over an existing connection
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
        }
    }

    /// Create a store on the shared `main` connection
    pub fn from_handles(handles: &RedisHandles, prefix: impl Into<String>) -> Self {
        Self::new(handles.main.clone(), prefix)
    }

    /// Connect to Redis and create a store
    pub async fn connect(url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        debug!(url = %url, "Connecting to Redis for job queue");

        let client =
            redis::Client::open(url).map_err(|e| QueueError::Config(e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self::new(conn, prefix))
    }

    fn key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, suffix)
    }

    /// Delete every key of `queue`
    pub async fn clear(&self, queue: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = ["pending", "processing", "delayed", "jobs", "stalls", "dead"]
            .iter()
            .map(|suffix| self.key(queue, suffix))
            .collect();
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, queue: &str, job: &QueuedJob) -> QueueResult<()> {
        ensure_pending(job)?;
        let mut conn = self.conn.clone();
        let id = job.message_id().to_string();

        let _: () = redis::pipe()
            .atomic()
            .hset(self.key(queue, "jobs"), &id, job.to_json()?)
            .ignore()
            .rpush(self.key(queue, "pending"), &id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        trace!(queue = %queue, message_id = %id, "Enqueued job in Redis");
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<QueuedJob>> {
        let mut conn = self.conn.clone();
        let now = now_millis();

        let leased: Option<(String, u32)> = self
            .dequeue_script
            .key(self.key(queue, "pending"))
            .key(self.key(queue, "processing"))
            .key(self.key(queue, "delayed"))
            .key(self.key(queue, "jobs"))
            .key(self.key(queue, "stalls"))
            .arg(now)
            .arg(now.saturating_add(millis(visibility_timeout)))
            .invoke_async(&mut conn)
            .await?;

        let Some((record, stalls)) = leased else {
            return Ok(None);
        };

        let mut job = QueuedJob::from_json(&record)?;
        if stalls > 0 {
            job.attempts = job.attempts.saturating_add(stalls);
            job.last_error = Some("lease expired".to_string());
        }
        job.transition(JobState::Dispatching, None)?;
        Ok(Some(job))
    }

    async fn ack(&self, queue: &str, message_id: MessageId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let id = message_id.to_string();

        let _: () = redis::pipe()
            .atomic()
            .zrem(self.key(queue, "processing"), &id)
            .ignore()
            .hdel(self.key(queue, "jobs"), &id)
            .ignore()
            .hdel(self.key(queue, "stalls"), &id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry(&self, queue: &str, job: &QueuedJob, delay: Duration) -> QueueResult<()> {
        ensure_pending(job)?;
        let mut conn = self.conn.clone();
        let id = job.message_id().to_string();
        let due = now_millis().saturating_add(millis(delay));

        let _: () = redis::pipe()
            .atomic()
            .zrem(self.key(queue, "processing"), &id)
            .ignore()
            .hset(self.key(queue, "jobs"), &id, job.to_json()?)
            .ignore()
            .hdel(self.key(queue, "stalls"), &id)
            .ignore()
            .zadd(self.key(queue, "delayed"), &id, due)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, job: &QueuedJob, error: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let id = job.message_id().to_string();
        let dead = serde_json::to_string(&DeadLetter::new(job, error))
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let _: () = redis::pipe()
            .atomic()
            .zrem(self.key(queue, "processing"), &id)
            .ignore()
            .zrem(self.key(queue, "delayed"), &id)
            .ignore()
            .lrem(self.key(queue, "pending"), 0, &id)
            .ignore()
            .hdel(self.key(queue, "jobs"), &id)
            .ignore()
            .hdel(self.key(queue, "stalls"), &id)
            .ignore()
            .lpush(self.key(queue, "dead"), dead)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let (pending, delayed): (usize, usize) = redis::pipe()
            .llen(self.key(queue, "pending"))
            .zcard(self.key(queue, "delayed"))
            .query_async(&mut conn)
            .await?;
        Ok(pending + delayed)
    }

    async fn ready_len(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let now = now_millis();
        let (pending, due, expired): (usize, usize, usize) = redis::pipe()
            .llen(self.key(queue, "pending"))
            .zcount(self.key(queue, "delayed"), "-inf", now)
            .zcount(self.key(queue, "processing"), "-inf", now)
            .query_async(&mut conn)
            .await?;
        Ok(pending + due + expired)
    }

    async fn in_flight(&self, queue: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(self.key(queue, "processing")).await?;
        Ok(count)
    }

    async fn dead_letters(&self, queue: &str, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let raw: Vec<String> = conn.lrange(self.key(queue, "dead"), 0, stop).await?;

        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| QueueError::Deserialization(e.to_string()))
            })
            .collect()
    }

    async fn redrive(&self, queue: &str, message_id: MessageId) -> QueueResult<QueuedJob> {
        let mut conn = self.conn.clone();
        let dead_key = self.key(queue, "dead");
        let raw: Vec<String> = conn.lrange(&dead_key, 0, -1).await?;

        for json in raw {
            let dead: DeadLetter = serde_json::from_str(&json)
                .map_err(|e| QueueError::Deserialization(e.to_string()))?;
            if dead.job.message_id != message_id {
                continue;
            }

            let removed: usize = conn.lrem(&dead_key, 1, &json).await?;
            if removed == 0 {
                // Redriven concurrently by someone else.
                break;
            }

            let job = redriven(dead);
            self.enqueue(queue, &job).await?;
            debug!(queue = %queue, message_id = %message_id, "Redrove dead letter");
            return Ok(job);
        }

        Err(QueueError::JobNotFound(message_id.to_string()))
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
