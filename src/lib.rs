//! # Courier
//!
//! A self-hosted queue for signed webhook dispatch.
//!
//! Courier accepts HTTP jobs from an application, stores them durably in
//! Redis, and delivers them from a background worker:
//!
//! - 🔏 **Signed** - every job and outbound request carries an HMAC-SHA256 signature
//! - 🚦 **Throttled** - bounded concurrency, start spacing and a sliding-window rate limit
//! - 🔄 **Retried** - exponential backoff with jitter, then a dead letter queue
//! - 📣 **Reported** - success and failure callbacks to the application
//! - ✅ **Verified** - inbound requests are checked before the body is trusted
//!
//! ## Quick Start
//!
//! ```no_run
//! use courier::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging(&LogSettings::from_env()?)?;
//!
//!     let courier = Courier::connect(CourierConfig::from_env()?).await?;
//!     let worker = courier.http_worker()?;
//!     worker.start().await?;
//!
//!     let receipt = courier
//!         .publisher()
//!         .publish_json(
//!             PublishRequest::new("/api/send-email", json!({"to": "user@example.com"}))
//!                 .failure_callback("/api/email-failed"),
//!         )
//!         .await?;
//!     println!("queued {}", receipt.message_id);
//!
//!     worker.shutdown().await?;
//!     courier.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Crates
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `courier-config` | Configuration from files and `COURIER_*` variables |
//! | `courier-redis` | Shared Redis connections |
//! | `courier-ratelimit` | Sliding-window rate limiting |
//! | `courier-webhooks` | Signing, HTTP dispatch, retry policy, inbound verification |
//! | `courier-queue` | Jobs, queue stores, publisher and worker |

pub mod app;
pub mod error;
pub mod telemetry;

pub use app::Courier;
pub use error::{CourierError, Result};
pub use telemetry::{LogFormat, LogSettings, init_logging};

pub use courier_config;
pub use courier_queue;
pub use courier_ratelimit;
pub use courier_redis;
pub use courier_webhooks;

/// Commonly used types.
pub mod prelude {
    pub use crate::app::Courier;
    pub use crate::error::{CourierError, Result};
    pub use crate::telemetry::{LogFormat, LogSettings, init_logging};

    pub use courier_config::{CourierConfig, RuntimeEnvironment, Validate, WorkerSettings};
    pub use courier_queue::{
        DeadLetter, Job, JobBody, JobOutcome, JobState, MessageId, PublishReceipt,
        PublishRequest, Publisher, QueueError, QueueStore, SendRequest, Worker, WorkerConfig,
    };
    pub use courier_ratelimit::{RateLimitDecision, RateLimiter, ratelimit};
    pub use courier_webhooks::{
        CallbackOutcome, CallbackPayload, Dispatch, DispatchError, InboundVerifier, RetryPolicy,
        Signer,
    };
}
