//! # Courier Rate Limiting
//!
//! Sliding-window rate limiting with in-memory and Redis storage.
//!
//! Every call to [`RateLimiter::limit`] consumes one point from the key's
//! budget. An exhausted budget comes back as a [`RateLimitDecision`] with
//! `allowed == false`; only store failures are errors.
//!
//! ## Quick Start
//!
//! ```rust
//! use courier_ratelimit::ratelimit;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // 5 requests per 10 seconds
//! let limiter = ratelimit(5, 10)?;
//!
//! let decision = limiter.limit("user_123").await?;
//! if decision.allowed {
//!     println!("{} remaining", decision.remaining);
//! } else {
//!     println!("retry in {}s", decision.reset);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Distributed limits
//!
//! Instances sharing a Redis store share budgets:
//!
//! ```rust,ignore
//! let limiter = RateLimiter::builder()
//!     .points(100)
//!     .window(Duration::from_secs(60))
//!     .redis_store(handles.main.clone())
//!     .key_prefix("courier")
//!     .build()?;
//! ```

pub mod config;
pub mod error;
pub mod stores;

pub use config::{DEFAULT_WINDOW_SECS, RateLimitConfig, RateLimiterBuilder};
pub use error::{RateLimitError, RateLimitHeaders, RateLimitResult};
pub use stores::{MemoryStore, RateLimitStore, WindowState};

#[cfg(feature = "redis")]
pub use stores::RedisStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request is allowed
    #[serde(rename = "success")]
    pub allowed: bool,
    /// Maximum number of requests allowed per window
    pub limit: u64,
    /// Number of remaining requests in the current window
    pub remaining: u64,
    /// Whole seconds (rounded up) until a point becomes available
    pub reset: u64,
}

impl RateLimitDecision {
    /// Time to wait before retrying
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.reset)
    }

    /// Standard rate limit headers for this decision
    pub fn headers(&self) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: self.limit,
            remaining: self.remaining,
            reset: self.reset,
            retry_after: (!self.allowed).then_some(self.reset),
        }
    }
}

/// The main rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
}

/// In-memory limiter allowing `points` calls per `window_secs` seconds.
pub fn ratelimit(points: u64, window_secs: u64) -> RateLimitResult<RateLimiter> {
    RateLimiter::builder()
        .points(points)
        .window(Duration::from_secs(window_secs))
        .build()
}

impl RateLimiter {
    /// Create a new rate limiter builder
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Create a new rate limiter with the given store
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Consume one point for `key`
    pub async fn limit(&self, key: &str) -> RateLimitResult<RateLimitDecision> {
        trace!(key = %key, "Checking rate limit");

        let state = self
            .store
            .consume(
                &self.config.storage_key(key),
                self.config.points,
                self.config.window,
            )
            .await?;

        let reset = ceil_secs(state.retry_after);

        if state.allowed {
            let remaining = self.config.points.saturating_sub(state.count);
            debug!(key = %key, remaining = remaining, "Sliding window: request allowed");
            Ok(RateLimitDecision {
                allowed: true,
                limit: self.config.points,
                remaining,
                reset,
            })
        } else {
            warn!(key = %key, reset = reset, "Sliding window: request denied");
            Ok(RateLimitDecision {
                allowed: false,
                limit: self.config.points,
                remaining: 0,
                reset,
            })
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Reset the rate limit for a key
    pub async fn reset(&self, key: &str) -> RateLimitResult<()> {
        debug!(key = %key, "Resetting rate limit");
        self.store.reset(&self.config.storage_key(key)).await
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    millis.div_ceil(1000)
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.store_type())
            .field("config", &self.config)
            .finish()
    }
}
