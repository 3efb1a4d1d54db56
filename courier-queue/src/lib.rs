//! Signed job queue and dispatch worker for Courier.
//!
//! Provides:
//! - 📦 Durable queue storage (Redis, or in-memory for tests)
//! - 🔏 HMAC-signed jobs that are re-verified before dispatch
//! - 🚦 A worker throttled by concurrency, start spacing and an optional rate limit
//! - 🔄 Retries with exponential backoff, then a dead letter queue
//! - 📣 Success and failure callbacks
//!
//! ## Quick Start - Job Creation
//!
//! ```
//! use courier_queue::{Job, JobBody};
//! use courier_webhooks::Signer;
//! use serde_json::json;
//!
//! let signer = Signer::new("supersecret").unwrap();
//! let job = Job::new("https://example.com/api/send-email", json!({"to": "user@example.com"}))
//!     .with_header("Content-Type", "application/json")
//!     .signed(&signer)
//!     .unwrap();
//!
//! assert_eq!(job.method, "POST");
//! assert!(job.verify(&signer));
//! assert!(matches!(job.body, JobBody::Json(_)));
//! ```
//!
//! ## Publishing
//!
//! ```
//! use courier_queue::{MemoryQueueStore, PublishRequest, Publisher};
//! use courier_webhooks::Signer;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryQueueStore::new());
//! let publisher = Publisher::new(store, Signer::new("supersecret")?, "jobs")
//!     .with_base_url("https://app.example.com")?;
//!
//! let receipt = publisher
//!     .publish_json(
//!         PublishRequest::new("/api/send-email", json!({"to": "user@example.com"}))
//!             .failure_callback("/api/email-failed"),
//!     )
//!     .await?;
//!
//! assert_eq!(receipt.url, "https://app.example.com/api/send-email");
//! # Ok(())
//! # }
//! ```
//!
//! ## Worker
//!
//! ```no_run
//! use courier_queue::*;
//! use courier_webhooks::{DispatchConfig, HttpDispatcher, Signer};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn QueueStore> = Arc::new(RedisQueueStore::connect("redis://localhost:6379", "courier").await?);
//! let dispatcher = Arc::new(HttpDispatcher::new(DispatchConfig::default())?);
//!
//! let worker = Worker::new(store, dispatcher, Signer::new("supersecret")?, WorkerConfig::default());
//! worker.start().await?;
//! // ...
//! worker.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod job;
pub mod lock;
pub mod publisher;
pub mod store;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use job::{DeadLetter, Job, JobBody, JobState, JobStatus, MessageId, QueuedJob};
pub use lock::{JobLock, LockToken, MemoryJobLock, RedisJobLock};
pub use publisher::{PublishReceipt, PublishRequest, Publisher, SendRequest};
pub use store::{MemoryQueueStore, QueueStore, RedisQueueStore};
pub use worker::{JobOutcome, Throttle, Worker, WorkerBuilder, WorkerConfig};
