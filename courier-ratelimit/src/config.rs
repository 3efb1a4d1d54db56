//! Rate limiter configuration and builder

use crate::RateLimiter;
use crate::error::{RateLimitError, RateLimitResult};
use crate::stores::{MemoryStore, RateLimitStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 10;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Points available per window
    pub points: u64,
    /// Window duration
    pub window: Duration,
    /// Key prefix for storage
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            points: 10,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            key_prefix: "ratelimit".to_string(),
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration builder
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Full storage key for a caller key
    pub fn storage_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

/// Builder for creating a RateLimiter
pub struct RateLimiterBuilder {
    points: Option<u64>,
    window: Duration,
    key_prefix: String,
    store: Option<Arc<dyn RateLimitStore>>,
}

impl RateLimiterBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            points: None,
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            key_prefix: "ratelimit".to_string(),
            store: None,
        }
    }

    /// Set the number of points per window
    pub fn points(mut self, points: u64) -> Self {
        self.points = Some(points);
        self
    }

    /// Set the window duration
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Use in-memory store (default)
    pub fn memory_store(mut self) -> Self {
        self.store = Some(Arc::new(MemoryStore::new()));
        self
    }

    /// Use Redis store for distributed rate limiting
    #[cfg(feature = "redis")]
    pub fn redis_store(mut self, conn: redis::aio::ConnectionManager) -> Self {
        self.store = Some(Arc::new(crate::stores::RedisStore::new(conn)));
        self
    }

    /// Use a shared store
    pub fn store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the key prefix for storage
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Build the rate limiter
    pub fn build(self) -> RateLimitResult<RateLimiter> {
        let points = self
            .points
            .ok_or_else(|| RateLimitError::config("Points must be specified"))?;
        if points == 0 {
            return Err(RateLimitError::config("Points must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(RateLimitError::config("Window must be non-zero"));
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        debug!(
            points = points,
            window = ?self.window,
            store_type = store.store_type(),
            "Building rate limiter"
        );

        let config = RateLimitConfig {
            points,
            window: self.window,
            key_prefix: self.key_prefix,
        };

        Ok(RateLimiter::new(store, config))
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.window, Duration::from_secs(10));
        assert_eq!(config.storage_key("user_1"), "ratelimit:user_1");
    }

    #[test]
    fn test_builder() {
        let limiter = RateLimiterBuilder::new()
            .points(100)
            .window(Duration::from_secs(60))
            .key_prefix("courier")
            .build()
            .unwrap();

        assert_eq!(limiter.config().points, 100);
        assert_eq!(limiter.config().key_prefix, "courier");
    }

    #[test]
    fn test_builder_missing_points() {
        assert!(RateLimiterBuilder::new().build().is_err());
    }

    #[test]
    fn test_builder_rejects_zero() {
        assert!(RateLimiterBuilder::new().points(0).build().is_err());
        assert!(
            RateLimiterBuilder::new()
                .points(1)
                .window(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
