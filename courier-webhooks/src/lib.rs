//! Signed webhook dispatch for Courier
//!
//! This crate holds the HTTP-facing half of Courier:
//!
//! - **Signing**: HMAC-SHA256 [`Signer`] shared by publishers, workers and receivers
//! - **Dispatch**: the [`Dispatch`] trait and its `reqwest`-backed [`HttpDispatcher`]
//! - **Retries**: [`RetryPolicy`] with capped exponential backoff
//! - **Callbacks**: the [`CallbackPayload`] posted when a job finishes
//! - **Inbound verification**: [`InboundVerifier`] for endpoints receiving dispatched requests
//!
//! # Example: Dispatching a signed request
//!
//! ```rust,no_run
//! use courier_webhooks::{Dispatch, DispatchConfig, DispatchRequest, HttpDispatcher, Signer};
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let signer = Signer::new("your-secret-key")?;
//!     let dispatcher = HttpDispatcher::new(DispatchConfig::default())?;
//!
//!     let request = DispatchRequest::new(Method::POST, "https://example.com/webhook")
//!         .header("Content-Type", "application/json")
//!         .body(r#"{"user_id":"123"}"#)
//!         .signed(&signer, "3b241101-e2bb-4255-8caf-4136c566a962");
//!
//!     dispatcher.dispatch(request).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Verifying an inbound request
//!
//! ```rust,no_run
//! use courier_config::RuntimeEnvironment;
//! use courier_webhooks::{InboundVerifier, Signer};
//!
//! # fn handle(headers: http::HeaderMap, raw_body: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = InboundVerifier::new(Signer::new("your-secret-key")?, RuntimeEnvironment::Production);
//!
//! // Pass the body exactly as received, before parsing it.
//! verifier.verify("https://app.example.com/api/send-email", &headers, raw_body)?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
pub mod inbound;
mod payload;
mod retry;
pub mod signature;

pub use client::{Dispatch, DispatchError, DispatchRequest, DispatchResponse, HttpDispatcher};
pub use config::{DispatchConfig, DispatchConfigBuilder};
pub use error::WebhookError;
pub use inbound::{InboundOutcome, InboundRejection, InboundVerifier, RejectionReason};
pub use payload::{CallbackOutcome, CallbackPayload};
pub use retry::RetryPolicy;
pub use signature::Signer;

/// Result type for webhook operations
pub type Result<T> = std::result::Result<T, WebhookError>;
