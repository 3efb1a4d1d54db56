//! Queue storage backends
//!
//! - **Memory**: single-process storage for tests and embedded use
//! - **Redis**: durable storage shared by every publisher and worker
//!
//! Both keep four collections per queue: pending ids in FIFO order, leased
//! ids with their lease deadline, delayed ids with their due time, and the
//! delivery records themselves. Dead letters live in a fifth collection.

mod memory;
mod redis;

pub use memory::MemoryQueueStore;
pub use redis::RedisQueueStore;

use crate::error::{QueueError, QueueResult};
use crate::job::{DeadLetter, JobState, MessageId, QueuedJob};
use async_trait::async_trait;
use std::time::Duration;

/// Durable storage for queued jobs.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append a job to the tail of `queue`.
    async fn enqueue(&self, queue: &str, job: &QueuedJob) -> QueueResult<()>;

    /// Lease the oldest ready job.
    ///
    /// As one atomic step: expired leases go back to the head of the queue,
    /// delayed jobs that are due go to its tail, then the head is popped and
    /// leased until `visibility_timeout` from now. Two callers never receive
    /// the same lease.
    ///
    /// An expired lease counts as an attempt, so a job whose worker dies
    /// mid-dispatch still runs out of attempts.
    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<QueuedJob>>;

    /// Delivery succeeded; forget the job.
    async fn ack(&self, queue: &str, message_id: MessageId) -> QueueResult<()>;

    /// Release the lease and make the job ready again after `delay`,
    /// persisting its delivery state.
    async fn retry(&self, queue: &str, job: &QueuedJob, delay: Duration) -> QueueResult<()>;

    /// Remove the job from the queue and record it as a dead letter.
    async fn dead_letter(&self, queue: &str, job: &QueuedJob, error: &str) -> QueueResult<()>;

    /// Jobs waiting in `queue`, delayed ones included.
    async fn len(&self, queue: &str) -> QueueResult<usize>;

    /// Jobs a `dequeue` could return right now: pending ones, delayed ones
    /// that are due and expired leases.
    async fn ready_len(&self, queue: &str) -> QueueResult<usize>;

    /// Jobs currently leased.
    async fn in_flight(&self, queue: &str) -> QueueResult<usize>;

    /// Most recent dead letters first.
    async fn dead_letters(&self, queue: &str, limit: usize) -> QueueResult<Vec<DeadLetter>>;

    /// Move a dead letter back to the tail of the queue with its attempts reset.
    async fn redrive(&self, queue: &str, message_id: MessageId) -> QueueResult<QueuedJob>;

    /// Get store type name for debugging
    fn store_type(&self) -> &'static str;
}

pub(crate) fn redriven(dead: DeadLetter) -> QueuedJob {
    QueuedJob::new(dead.job)
}

/// Only pending records may enter the ready side of a queue.
pub(crate) fn ensure_pending(job: &QueuedJob) -> QueueResult<()> {
    match job.state() {
        JobState::Pending => Ok(()),
        from => Err(QueueError::InvalidTransition {
            from,
            to: JobState::Pending,
        }),
    }
}
