//! Error types for queue operations.

use crate::job::JobState;
use courier_ratelimit::RateLimitError;
use courier_webhooks::WebhookError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The job can never be dispatched as described
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Illegal lifecycle transition
    #[error("Invalid job state transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    /// Queue store failure outside Redis
    #[error("Store error: {0}")]
    Store(String),

    /// Job lock failure
    #[error("Lock error: {0}")]
    Lock(String),

    /// Worker not running
    #[error("Worker not running")]
    WorkerNotRunning,

    /// Worker already running
    #[error("Worker already running")]
    WorkerAlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    /// Timeout error
    #[error("Operation timeout")]
    Timeout,
}

impl QueueError {
    /// Shorthand for [`QueueError::InvalidJob`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidJob(message.into())
    }
}
