//! In-memory rate limit store
//!
//! Uses DashMap for thread-safe concurrent access. Suitable for single-instance
//! deployments or testing. For distributed deployments, use the Redis store.
//!
//! Keys whose window has fully elapsed are swept every [`SWEEP_EVERY`]
//! consumes, so idle callers do not accumulate.

use crate::error::RateLimitResult;
use crate::stores::{RateLimitStore, WindowState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Consumes between sweeps of idle keys
pub const SWEEP_EVERY: u64 = 1024;

/// In-memory rate limit store
pub struct MemoryStore {
    /// Sliding window logs
    logs: DashMap<String, SlidingLog>,
    consumed: AtomicU64,
    sweep_every: u64,
}

#[derive(Debug)]
struct SlidingLog {
    window: Duration,
    entries: VecDeque<Instant>,
}

impl SlidingLog {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(*front) >= self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn retry_after(&self, now: Instant) -> Duration {
        self.entries
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or_default()
    }
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        debug!("Creating new in-memory rate limit store");
        Self::with_sweep_every(SWEEP_EVERY)
    }

    /// Sweep idle keys every `consumes` calls to `consume`
    pub fn with_sweep_every(consumes: u64) -> Self {
        Self {
            logs: DashMap::new(),
            consumed: AtomicU64::new(0),
            sweep_every: consumes.max(1),
        }
    }

    fn sweep(&self, now: Instant) {
        self.logs.retain(|_, log| {
            log.prune(now);
            !log.entries.is_empty()
        });
    }

    /// Get the number of tracked keys (for monitoring)
    pub fn key_count(&self) -> usize {
        self.logs.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn consume(
        &self,
        key: &str,
        points: u64,
        window: Duration,
    ) -> RateLimitResult<WindowState> {
        trace!(key = %key, points = points, window = ?window, "Sliding window check");

        let now = Instant::now();

        let state = {
            // The entry guard holds the shard lock across prune, count and push.
            let mut log = self
                .logs
                .entry(key.to_string())
                .or_insert_with(|| SlidingLog {
                    window,
                    entries: VecDeque::new(),
                });
            log.window = window;
            log.prune(now);

            let count = log.entries.len() as u64;
            let allowed = count < points;
            if allowed {
                log.entries.push_back(now);
            }

            WindowState {
                allowed,
                count: log.entries.len() as u64,
                retry_after: log.retry_after(now),
            }
        };

        // Sweep only once the entry guard is dropped.
        let consumed = self.consumed.fetch_add(1, Ordering::Relaxed) + 1;
        if consumed % self.sweep_every == 0 {
            self.sweep(now);
        }

        Ok(state)
    }

    async fn reset(&self, key: &str) -> RateLimitResult<()> {
        debug!(key = %key, "Resetting rate limit state");
        self.logs.remove(key);
        Ok(())
    }

    async fn cleanup(&self) -> RateLimitResult<()> {
        self.sweep(Instant::now());
        debug!(key_count = self.key_count(), "Cleanup complete");
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
