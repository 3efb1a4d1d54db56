//! In-memory queue store

use crate::error::{QueueError, QueueResult};
use crate::job::{DeadLetter, JobState, MessageId, QueuedJob};
use crate::store::{QueueStore, ensure_pending, redriven};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<MessageId>,
    processing: HashMap<MessageId, Instant>,
    delayed: Vec<(Instant, MessageId)>,
    jobs: HashMap<MessageId, QueuedJob>,
    dead: Vec<DeadLetter>,
}

impl QueueState {
    fn requeue_expired(&mut self, now: Instant) {
        let mut expired: Vec<(Instant, MessageId)> = self
            .processing
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, *id))
            .collect();
        // Oldest lease ends up at the head.
        expired.sort();
        for (_, id) in expired.into_iter().rev() {
            self.processing.remove(&id);
            if let Some(job) = self.jobs.get_mut(&id) {
                job.attempts += 1;
                let _ = job.transition(JobState::Pending, Some("lease expired".to_string()));
            }
            debug!(message_id = %id, "Lease expired, job returned to queue");
            self.pending.push_front(id);
        }
    }

    fn promote_due(&mut self, now: Instant) {
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = waiting;
        due.sort();
        self.pending.extend(due.into_iter().map(|(_, id)| id));
    }

    fn release(&mut self, id: &MessageId) {
        self.processing.remove(id);
        self.pending.retain(|p| p != id);
        self.delayed.retain(|(_, d)| d != id);
    }
}

/// Single-process [`QueueStore`].
///
/// Time is read from `tokio::time`, so paused-clock tests drive leases and
/// delays deterministically.
#[derive(Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryQueueStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, queue: &str, job: &QueuedJob) -> QueueResult<()> {
        ensure_pending(job)?;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let id = job.message_id();

        state.jobs.insert(id, job.clone());
        state.pending.push_back(id);
        trace!(queue = %queue, message_id = %id, "Enqueued job in memory");
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> QueueResult<Option<QueuedJob>> {
        let mut queues = self.queues.lock().await;
        let Some(state) = queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Instant::now();
        state.requeue_expired(now);
        state.promote_due(now);

        while let Some(id) = state.pending.pop_front() {
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.transition(JobState::Dispatching, None)?;
            state.processing.insert(id, now + visibility_timeout);
            return Ok(Some(job.clone()));
        }

        Ok(None)
    }

    async fn ack(&self, queue: &str, message_id: MessageId) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(queue) {
            state.release(&message_id);
            state.jobs.remove(&message_id);
        }
        Ok(())
    }

    async fn retry(&self, queue: &str, job: &QueuedJob, delay: Duration) -> QueueResult<()> {
        ensure_pending(job)?;
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let id = job.message_id();

        state.release(&id);
        state.jobs.insert(id, job.clone());
        state.delayed.push((Instant::now() + delay, id));
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, job: &QueuedJob, error: &str) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let id = job.message_id();

        state.release(&id);
        state.jobs.remove(&id);
        state.dead.push(DeadLetter::new(job, error));
        Ok(())
    }

    async fn len(&self, queue: &str) -> QueueResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|s| s.pending.len() + s.delayed.len())
            .unwrap_or(0))
    }

    async fn ready_len(&self, queue: &str) -> QueueResult<usize> {
        let queues = self.queues.lock().await;
        let now = Instant::now();
        Ok(queues
            .get(queue)
            .map(|s| {
                let due = s.delayed.iter().filter(|(at, _)| *at <= now).count();
                let expired = s.processing.values().filter(|d| **d <= now).count();
                s.pending.len() + due + expired
            })
            .unwrap_or(0))
    }

    async fn in_flight(&self, queue: &str) -> QueueResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map(|s| s.processing.len()).unwrap_or(0))
    }

    async fn dead_letters(&self, queue: &str, limit: usize) -> QueueResult<Vec<DeadLetter>> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|s| s.dead.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn redrive(&self, queue: &str, message_id: MessageId) -> QueueResult<QueuedJob> {
        let mut queues = self.queues.lock().await;
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::JobNotFound(message_id.to_string()))?;

        let index = state
            .dead
            .iter()
            .position(|d| d.job.message_id == message_id)
            .ok_or_else(|| QueueError::JobNotFound(message_id.to_string()))?;

        let job = redriven(state.dead.remove(index));
        state.jobs.insert(message_id, job.clone());
        state.pending.push_back(message_id);
        Ok(job)
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
