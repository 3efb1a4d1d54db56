//! Rate limit storage backends
//!
//! This module provides different storage backends for rate limiting:
//!
//! - **Memory**: In-memory storage using DashMap (default, single-instance)
//! - **Redis**: Distributed storage for multi-instance deployments

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;

use crate::error::RateLimitResult;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a single consume against a sliding window log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether a point was consumed
    pub allowed: bool,
    /// Entries in the window after this call
    pub count: u64,
    /// Time until the oldest entry leaves the window
    pub retry_after: Duration,
}

/// Trait for rate limit storage backends
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Prune, count and (if under `points`) record one entry for `key`, as a
    /// single atomic step.
    async fn consume(&self, key: &str, points: u64, window: Duration)
    -> RateLimitResult<WindowState>;

    /// Reset rate limit state for a key
    async fn reset(&self, key: &str) -> RateLimitResult<()>;

    /// Clean up expired entries (optional, for memory optimization)
    async fn cleanup(&self) -> RateLimitResult<()> {
        Ok(())
    }

    /// Get store type name for debugging
    fn store_type(&self) -> &'static str;
}
