//! Publishing jobs onto a queue.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobBody, MessageId, QueuedJob, check_absolute_url};
use crate::store::QueueStore;
use chrono::{DateTime, Utc};
use courier_webhooks::Signer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// A fire-and-forget dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// Absolute URL, or a path resolved against the publisher's base URL
    pub url: String,
    pub body: JobBody,
    pub headers: BTreeMap<String, String>,
    /// Defaults to `POST`
    pub method: Option<String>,
}

impl SendRequest {
    pub fn new(url: impl Into<String>, body: impl Into<JobBody>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            headers: BTreeMap::new(),
            method: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// A JSON dispatch with optional completion callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub url: String,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    pub method: Option<String>,
    /// Notified after a 2xx delivery
    pub callback: Option<String>,
    /// Notified once when delivery is abandoned
    pub failure_callback: Option<String>,
}

impl PublishRequest {
    pub fn new(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            body,
            headers: BTreeMap::new(),
            method: None,
            callback: None,
            failure_callback: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn callback(mut self, url: impl Into<String>) -> Self {
        self.callback = Some(url.into());
        self
    }

    pub fn failure_callback(mut self, url: impl Into<String>) -> Self {
        self.failure_callback = Some(url.into());
        self
    }
}

/// Returned by [`Publisher::publish_json`] to correlate later callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub message_id: MessageId,
    pub url: String,
    pub callback: Option<String>,
    pub failure_callback: Option<String>,
    pub queued_at: DateTime<Utc>,
}

/// Signs jobs and appends them to a queue.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn QueueStore>,
    signer: Signer,
    queue: String,
    base_url: Option<Url>,
}

impl Publisher {
    /// Create a new publisher.
    pub fn new(store: Arc<dyn QueueStore>, signer: Signer, queue: impl Into<String>) -> Self {
        Self {
            store,
            signer,
            queue: queue.into(),
            base_url: None,
        }
    }

    /// Resolve relative job and callback URLs against `base_url`.
    pub fn with_base_url(mut self, base_url: &str) -> QueueResult<Self> {
        let base = check_absolute_url(base_url)
            .map_err(|e| QueueError::Config(format!("invalid base url: {e}")))?;
        self.base_url = Some(base);
        Ok(self)
    }

    /// Queue name this publisher writes to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Queue an HTTP dispatch and return its message id.
    ///
    /// Returns once the job is durably stored; store failures propagate.
    pub async fn send(&self, request: SendRequest) -> QueueResult<MessageId> {
        let url = self.resolve(&request.url)?;
        let job = Job::new(url, request.body)
            .with_method(request.method.unwrap_or_else(|| "POST".to_string()))
            .with_headers(request.headers);

        let job = self.publish(job).await?;
        Ok(job.message_id)
    }

    /// Queue a JSON dispatch with optional callbacks.
    ///
    /// Adds `Content-Type: application/json` unless the caller set a content type.
    pub async fn publish_json(&self, request: PublishRequest) -> QueueResult<PublishReceipt> {
        let url = self.resolve(&request.url)?;
        let callback = request
            .callback
            .as_deref()
            .map(|raw| self.resolve(raw))
            .transpose()?;
        let failure_callback = request
            .failure_callback
            .as_deref()
            .map(|raw| self.resolve(raw))
            .transpose()?;

        let mut job = Job::new(url, request.body)
            .with_method(request.method.unwrap_or_else(|| "POST".to_string()))
            .with_headers(request.headers);
        if job.header("content-type").is_none() {
            job = job.with_header("Content-Type", "application/json");
        }
        job.callback = callback;
        job.failure_callback = failure_callback;

        let job = self.publish(job).await?;
        Ok(PublishReceipt {
            message_id: job.message_id,
            url: job.url,
            callback: job.callback,
            failure_callback: job.failure_callback,
            queued_at: Utc::now(),
        })
    }

    async fn publish(&self, job: Job) -> QueueResult<Job> {
        job.validate()?;
        let job = job.signed(&self.signer)?;

        self.store.enqueue(&self.queue, &QueuedJob::new(job.clone())).await?;

        debug!(
            queue = %self.queue,
            message_id = %job.message_id,
            url = %job.url,
            "Published job"
        );
        Ok(job)
    }

    fn resolve(&self, raw: &str) -> QueueResult<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(QueueError::invalid("empty url"));
        }

        match Url::parse(raw) {
            Ok(_) => Ok(check_absolute_url(raw)?.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.as_ref().ok_or_else(|| {
                    QueueError::invalid(format!("relative url '{raw}' without a base url"))
                })?;
                base.join(raw)
                    .map(|u| u.to_string())
                    .map_err(|e| QueueError::invalid(format!("invalid url '{raw}': {e}")))
            }
            Err(e) => Err(QueueError::invalid(format!("invalid url '{raw}': {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;
    use serde_json::json;
    use std::time::Duration;

    fn publisher() -> (Publisher, Arc<MemoryQueueStore>) {
        let store = Arc::new(MemoryQueueStore::new());
        let publisher = Publisher::new(store.clone(), Signer::new("secret").unwrap(), "jobs");
        (publisher, store)
    }

    async fn leased(store: &MemoryQueueStore) -> Job {
        store
            .dequeue("jobs", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap()
            .job
    }

    #[tokio::test]
    async fn test_send_enqueues_signed_job() {
        let (publisher, store) = publisher();

        let id = publisher
            .send(SendRequest::new("https://example.com/hook", "hello"))
            .await
            .unwrap();

        let job = leased(&store).await;
        assert_eq!(job.message_id, id);
        assert_eq!(job.method, "POST");
        assert_eq!(job.body, JobBody::Text("hello".into()));
        assert!(job.verify(&Signer::new("secret").unwrap()));
    }

    #[tokio::test]
    async fn test_publish_json_receipt() {
        let (publisher, store) = publisher();

        let receipt = publisher
            .publish_json(
                PublishRequest::new("https://example.com/hook", json!({"id": 1}))
                    .callback("https://example.com/done")
                    .failure_callback("https://example.com/failed"),
            )
            .await
            .unwrap();

        assert_eq!(receipt.url, "https://example.com/hook");
        assert_eq!(receipt.callback.as_deref(), Some("https://example.com/done"));
        assert_eq!(
            receipt.failure_callback.as_deref(),
            Some("https://example.com/failed")
        );

        let job = leased(&store).await;
        assert_eq!(job.message_id, receipt.message_id);
        assert_eq!(job.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn test_publish_json_keeps_caller_content_type() {
        let (publisher, store) = publisher();

        publisher
            .publish_json(
                PublishRequest::new("https://example.com/hook", json!({}))
                    .header("content-type", "application/vnd.api+json"),
            )
            .await
            .unwrap();

        let job = leased(&store).await;
        assert_eq!(job.headers.len(), 1);
        assert_eq!(job.header("Content-Type"), Some("application/vnd.api+json"));
    }

    #[tokio::test]
    async fn test_relative_urls_resolve_against_base() {
        let (publisher, store) = publisher();
        let publisher = publisher.with_base_url("https://app.example.com").unwrap();

        let receipt = publisher
            .publish_json(
                PublishRequest::new("/api/send-email", json!({})).callback("/api/sent"),
            )
            .await
            .unwrap();

        assert_eq!(receipt.url, "https://app.example.com/api/send-email");
        assert_eq!(
            receipt.callback.as_deref(),
            Some("https://app.example.com/api/sent")
        );
        assert_eq!(leased(&store).await.url, receipt.url);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_not_enqueued() {
        let (publisher, store) = publisher();

        let cases = [
            SendRequest::new("", json!({})),
            SendRequest::new("/api/no-base", json!({})),
            SendRequest::new("mailto:someone@example.com", json!({})),
            SendRequest::new("https://example.com", json!({})).method("BAD METHOD"),
        ];
        for request in cases {
            let result = publisher.send(request).await;
            assert!(matches!(result, Err(QueueError::InvalidJob(_))));
        }

        let result = publisher
            .publish_json(
                PublishRequest::new("https://example.com", json!({})).callback("not a url"),
            )
            .await;
        assert!(matches!(result, Err(QueueError::InvalidJob(_))));

        assert_eq!(store.len("jobs").await.unwrap(), 0);
    }

    #[test]
    fn test_invalid_base_url() {
        let (publisher, _) = publisher();
        assert!(matches!(
            publisher.with_base_url("not a url"),
            Err(QueueError::Config(_))
        ));
    }
}
