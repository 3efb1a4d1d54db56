//! # Courier Redis
//!
//! Shared Redis connection handles for Courier.
//!
//! A process opens one [`RedisHandles`] at startup and hands clones of it to
//! every component that needs the store. The `main` connection carries queue
//! and rate-limit traffic; the `locker` connection is reserved for
//! distributed job locks so lock renewals never queue behind bulk commands.
//!
//! ```rust,ignore
//! use courier_redis::{RedisConfig, RedisHandles};
//!
//! let config = RedisConfig::from_env().build();
//! let handles = RedisHandles::connect(&config).await?;
//! handles.health_check().await?;
//! ```

mod config;
mod error;
mod handles;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use handles::RedisHandles;

// Re-export redis crate for convenience
pub use redis;
pub use redis::aio::ConnectionManager;
