//! Top-level error type.

use courier_config::ConfigError;
use courier_queue::QueueError;
use courier_ratelimit::RateLimitError;
use courier_redis::RedisError;
use courier_webhooks::WebhookError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Redis(#[from] RedisError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
}

pub type Result<T> = std::result::Result<T, CourierError>;
