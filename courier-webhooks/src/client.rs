//! HTTP dispatch of queued requests

use crate::{DispatchConfig, Result, Signer, signature::headers};
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// A single outbound HTTP request
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub url: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// Overrides the dispatcher's default timeout
    pub timeout: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            timeout: None,
        }
    }

    /// Set a header, replacing any existing one whose name differs only in case.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    pub fn headers(self, headers: &BTreeMap<String, String>) -> Self {
        headers
            .iter()
            .fold(self, |request, (k, v)| request.header(k.clone(), v.clone()))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach the message id and a signature over the current body.
    ///
    /// Call after the body is final.
    pub fn signed(self, signer: &Signer, message_id: &str) -> Self {
        let signature = signer.sign(&self.body);
        self.header(headers::SIGNATURE, signature)
            .header(headers::MESSAGE_ID, message_id)
    }
}

/// A 2xx response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status: u16,
    pub body: String,
}

/// Dispatch failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No response within the timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, TLS or protocol failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status
    #[error("Endpoint returned status {status}")]
    Status { status: u16, body: String },

    /// The request can never be sent as built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Whether sending the same request again could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }

    /// HTTP status, if the endpoint responded
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sends requests to their destination
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> std::result::Result<DispatchResponse, DispatchError>;
}

/// [`Dispatch`] over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    config: DispatchConfig,
    http_client: Client,
}

impl HttpDispatcher {
    /// Create a new dispatcher
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error, timeout: Duration) -> DispatchError {
        if err.is_timeout() {
            DispatchError::Timeout(timeout)
        } else if err.is_builder() {
            DispatchError::InvalidRequest(err.to_string())
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> std::result::Result<DispatchResponse, DispatchError> {
        if request.body.len() > self.config.max_payload_size {
            return Err(DispatchError::InvalidRequest(format!(
                "Payload too large: {} bytes (max: {})",
                request.body.len(),
                self.config.max_payload_size
            )));
        }

        let timeout = request.timeout.unwrap_or(self.config.timeout);
        debug!(url = %request.url, method = %request.method, "Dispatching request");

        let mut builder = self
            .http_client
            .request(request.method.clone(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify(e, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.classify(e, timeout))?;
        let body = truncate_utf8(body, self.config.max_response_body);

        if status.is_success() {
            debug!(url = %request.url, status = status.as_u16(), "Request delivered");
            Ok(DispatchResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            warn!(url = %request.url, status = status.as_u16(), "Endpoint rejected request");
            Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn truncate_utf8(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}
