//! Job definition and state management.

use crate::error::{QueueError, QueueResult};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use courier_webhooks::Signer;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Job unique identifier.
pub type MessageId = Uuid;

/// Job payload, tagged with its kind.
///
/// Serialized as `{"kind": "json", "data": ...}` or `{"kind": "text", "data": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum JobBody {
    Json(Value),
    Text(String),
}

impl JobBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
        }
    }

    /// Bytes sent as the HTTP request body.
    pub fn to_bytes(&self) -> QueueResult<Bytes> {
        match self {
            Self::Json(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| QueueError::Serialization(e.to_string())),
            Self::Text(text) => Ok(Bytes::from(text.clone())),
        }
    }

    fn canonical(&self) -> Value {
        match self {
            Self::Json(value) => serde_json::json!({ "kind": "json", "data": sorted(value) }),
            Self::Text(text) => serde_json::json!({ "kind": "text", "data": text }),
        }
    }
}

impl From<Value> for JobBody {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for JobBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for JobBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Rebuild `value` with every object's keys in ascending order.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (key, value) in entries {
                out.insert(key.clone(), sorted(value));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting in the queue, possibly delayed
    Pending,
    /// Leased by a worker
    Dispatching,
    /// Delivered with a 2xx response
    Succeeded,
    /// Last attempt failed, another will follow
    FailedRetryable,
    /// No further attempts; dead-lettered
    FailedTerminal,
}

impl JobState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `Dispatching -> Pending` covers expired leases and lock contention;
    /// `FailedTerminal -> Pending` is a redrive.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Dispatching)
                | (Dispatching, Succeeded)
                | (Dispatching, FailedRetryable)
                | (Dispatching, FailedTerminal)
                | (Dispatching, Pending)
                | (FailedRetryable, Pending)
                | (FailedTerminal, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }
}

/// Job status information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Current state
    pub state: JobState,

    /// Error message (if failed)
    pub error: Option<String>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    /// Create a new pending status.
    pub fn pending() -> Self {
        Self::new(JobState::Pending, None)
    }

    fn new(state: JobState, error: Option<String>) -> Self {
        Self {
            state,
            error,
            updated_at: Utc::now(),
        }
    }
}

/// A signed HTTP dispatch, immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub message_id: MessageId,
    /// Absolute destination URL
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: JobBody,
    #[serde(default)]
    pub callback: Option<String>,
    #[serde(default)]
    pub failure_callback: Option<String>,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
    /// Hex HMAC-SHA256 over [`Job::signing_payload`]
    #[serde(default)]
    pub signature: String,
}

/// Fields covered by the signature, in signing order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigningForm<'a> {
    message_id: &'a MessageId,
    url: &'a str,
    method: &'a str,
    headers: &'a BTreeMap<String, String>,
    body: Value,
    callback: &'a Option<String>,
    failure_callback: &'a Option<String>,
    created_at: i64,
}

impl Job {
    /// Create an unsigned `POST` job with a fresh message id.
    pub fn new(url: impl Into<String>, body: impl Into<JobBody>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            url: url.into(),
            method: Method::POST.to_string(),
            headers: BTreeMap::new(),
            body: body.into(),
            callback: None,
            failure_callback: None,
            created_at: Utc::now().timestamp_millis(),
            signature: String::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn with_failure_callback(mut self, failure_callback: impl Into<String>) -> Self {
        self.failure_callback = Some(failure_callback.into());
        self
    }

    /// Canonical bytes covered by the signature.
    ///
    /// The signature field itself is excluded and keys inside `body.data`
    /// are sorted, so the result does not depend on how the job was stored.
    pub fn signing_payload(&self) -> QueueResult<Vec<u8>> {
        let form = SigningForm {
            message_id: &self.message_id,
            url: &self.url,
            method: &self.method,
            headers: &self.headers,
            body: self.body.canonical(),
            callback: &self.callback,
            failure_callback: &self.failure_callback,
            created_at: self.created_at,
        };
        serde_json::to_vec(&form).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    /// Sign the job in place.
    pub fn sign(&mut self, signer: &Signer) -> QueueResult<()> {
        self.signature = signer.sign(&self.signing_payload()?);
        Ok(())
    }

    pub fn signed(mut self, signer: &Signer) -> QueueResult<Self> {
        self.sign(signer)?;
        Ok(self)
    }

    /// Whether the stored signature matches the job's current contents.
    pub fn verify(&self, signer: &Signer) -> bool {
        match self.signing_payload() {
            Ok(payload) => signer.verify(&payload, &self.signature),
            Err(_) => false,
        }
    }

    /// Parsed HTTP method.
    pub fn http_method(&self) -> QueueResult<Method> {
        Method::from_bytes(self.method.as_bytes())
            .map_err(|_| QueueError::invalid(format!("invalid method '{}'", self.method)))
    }

    /// Value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Check that the job can be dispatched as described.
    ///
    /// A JSON body must not be declared with a non-JSON content type, and a
    /// text body declared as JSON must parse as JSON.
    pub fn validate(&self) -> QueueResult<()> {
        self.http_method()?;
        check_absolute_url(&self.url)?;

        let declares_json = self
            .header("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("json"));

        match (&self.body, declares_json) {
            (JobBody::Json(_), Some(false)) => Err(QueueError::invalid(
                "json body declared with a non-json content type",
            )),
            (JobBody::Text(text), Some(true)) => serde_json::from_str::<Value>(text)
                .map(|_| ())
                .map_err(|e| QueueError::invalid(format!("text body is not valid json: {e}"))),
            _ => Ok(()),
        }
    }
}

pub(crate) fn check_absolute_url(raw: &str) -> QueueResult<url::Url> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| QueueError::invalid(format!("invalid url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(QueueError::invalid(format!(
            "unsupported url scheme '{scheme}' in '{raw}'"
        ))),
    }
}

/// The persisted delivery record: a signed [`Job`] plus mutable delivery
/// state that the signature does not cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub job: Job,
    pub status: JobStatus,
    /// Dispatch attempts made so far
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            status: JobStatus::pending(),
            attempts: 0,
            last_error: None,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.job.message_id
    }

    pub fn state(&self) -> JobState {
        self.status.state
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, next: JobState, error: Option<String>) -> QueueResult<()> {
        let current = self.status.state;
        if !current.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        if error.is_some() {
            self.last_error.clone_from(&error);
        }
        self.status = JobStatus::new(next, error);
        Ok(())
    }

    pub(crate) fn to_json(&self) -> QueueResult<String> {
        serde_json::to_string(self).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    pub(crate) fn from_json(json: &str) -> QueueResult<Self> {
        serde_json::from_str(json).map_err(|e| QueueError::Deserialization(e.to_string()))
    }
}

/// A job that will not be attempted again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub job: Job,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(queued: &QueuedJob, error: impl Into<String>) -> Self {
        Self {
            job: queued.job.clone(),
            attempts: queued.attempts,
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}
