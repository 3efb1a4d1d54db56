//! Worker draining a queue into HTTP dispatches.

use crate::error::{QueueError, QueueResult};
use crate::job::{JobState, QueuedJob};
use crate::lock::JobLock;
use crate::store::QueueStore;
use courier_config::WorkerSettings;
use courier_ratelimit::RateLimiter;
use courier_webhooks::signature::headers;
use courier_webhooks::{
    CallbackPayload, Dispatch, DispatchError, DispatchRequest, DispatchResponse, RetryPolicy,
    Signer,
};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to drain
    pub queue: String,

    /// Dispatches in flight at once
    pub max_concurrent: usize,

    /// Minimum spacing between dispatch starts
    pub min_interval: Duration,

    /// Wait between polls of an empty queue
    pub poll_interval: Duration,

    /// Lease length; an unacknowledged job is redelivered after this
    pub visibility_timeout: Duration,

    /// Bound on each dispatch and callback
    pub dispatch_timeout: Duration,

    pub retry_policy: RetryPolicy,

    /// Delay before retrying a job whose lock another worker holds
    pub lock_contention_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: "jobs".to_string(),
            max_concurrent: 1,
            min_interval: Duration::from_millis(100),
            poll_interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(90),
            dispatch_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            lock_contention_delay: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    /// Build from loaded settings.
    pub fn from_settings(queue: impl Into<String>, settings: &WorkerSettings) -> Self {
        Self {
            queue: queue.into(),
            max_concurrent: settings.max_concurrent.max(1),
            min_interval: settings.min_interval(),
            poll_interval: settings.poll_interval(),
            visibility_timeout: settings.visibility_timeout(),
            dispatch_timeout: settings.dispatch_timeout(),
            retry_policy: RetryPolicy {
                max_attempts: settings.max_attempts.max(1),
                initial_delay: settings.initial_backoff(),
                max_delay: settings.max_backoff(),
                backoff_multiplier: settings.backoff_multiplier,
                jitter: true,
            },
            ..Default::default()
        }
    }
}

/// Bounds in-flight dispatches and spaces their starts.
pub struct Throttle {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_interval,
            next_start: Mutex::new(None),
        }
    }

    /// Wait for a free dispatch slot.
    pub async fn acquire(&self) -> QueueResult<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| QueueError::WorkerNotRunning)
    }

    /// Wait until at least `min_interval` has passed since the previous start.
    pub async fn wait_turn(&self) {
        let start = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = next.map_or(now, |at| at.max(now));
            *next = Some(start + self.min_interval);
            start
        };
        tokio::time::sleep_until(start).await;
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }

    /// Wait up to `timeout` for every slot to come back.
    async fn drain(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(timeout, self.permits.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }
}

/// Final result of handling one leased job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Retrying,
    DeadLettered,
    /// Another worker holds the job lock
    Deferred,
}

enum Poll {
    Job(QueuedJob),
    Idle(Duration),
}

struct WorkerInner {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<dyn Dispatch>,
    signer: Signer,
    config: WorkerConfig,
    throttle: Throttle,
    rate_limiter: Option<RateLimiter>,
    lock: Option<Arc<dyn JobLock>>,
}

/// Worker for processing jobs from a queue.
pub struct Worker {
    inner: Arc<WorkerInner>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Assembles a [`Worker`].
pub struct WorkerBuilder {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<dyn Dispatch>,
    signer: Signer,
    config: WorkerConfig,
    rate_limiter: Option<RateLimiter>,
    lock: Option<Arc<dyn JobLock>>,
}

impl WorkerBuilder {
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Gate dequeues on a limiter keyed by the queue name.
    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Take a per-job lock before dispatching.
    pub fn lock(mut self, lock: Arc<dyn JobLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn build(self) -> Worker {
        let throttle = Throttle::new(self.config.max_concurrent, self.config.min_interval);
        Worker {
            inner: Arc::new(WorkerInner {
                store: self.store,
                dispatcher: self.dispatcher,
                signer: self.signer,
                config: self.config,
                throttle,
                rate_limiter: self.rate_limiter,
                lock: self.lock,
            }),
            shutdown: watch::channel(false).0,
            handle: Mutex::new(None),
        }
    }
}

impl Worker {
    /// Create a worker with custom configuration.
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<dyn Dispatch>,
        signer: Signer,
        config: WorkerConfig,
    ) -> Self {
        Self::builder(store, dispatcher, signer).config(config).build()
    }

    pub fn builder(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<dyn Dispatch>,
        signer: Signer,
    ) -> WorkerBuilder {
        WorkerBuilder {
            store,
            dispatcher,
            signer,
            config: WorkerConfig::default(),
            rate_limiter: None,
            lock: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Spawn the consumer loop.
    pub async fn start(&self) -> QueueResult<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Err(QueueError::WorkerAlreadyRunning);
        }
        self.shutdown.send_replace(false);

        info!(
            queue = %self.inner.config.queue,
            max_concurrent = self.inner.config.max_concurrent,
            min_interval_ms = self.inner.config.min_interval.as_millis() as u64,
            "Starting worker"
        );

        let inner = self.inner.clone();
        let shutdown = self.shutdown.subscribe();
        *handle = Some(tokio::spawn(inner.run(shutdown)));
        Ok(())
    }

    /// Stop dequeuing and wait for in-flight jobs.
    ///
    /// Jobs still running after twice the dispatch timeout (dispatch plus
    /// callback) are left to lease expiry.
    pub async fn shutdown(&self) -> QueueResult<()> {
        let handle = self
            .handle
            .lock()
            .await
            .take()
            .ok_or(QueueError::WorkerNotRunning)?;

        info!(queue = %self.inner.config.queue, "Stopping worker");
        self.shutdown.send_replace(true);
        if let Err(e) = handle.await {
            error!(error = %e, "Worker loop panicked");
        }

        let budget = self.inner.config.dispatch_timeout.saturating_mul(2);
        if self.inner.throttle.drain(budget).await {
            info!(queue = %self.inner.config.queue, "Worker stopped");
            Ok(())
        } else {
            warn!(
                queue = %self.inner.config.queue,
                in_flight = self.inner.throttle.in_flight(),
                "Worker stopped with jobs still in flight"
            );
            Err(QueueError::Timeout)
        }
    }

    /// Check if the worker is running.
    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    /// Process at most one job inline.
    ///
    /// Returns `None` if nothing was ready or the rate limit is exhausted.
    pub async fn run_once(&self) -> QueueResult<Option<JobOutcome>> {
        let _permit = self.inner.throttle.acquire().await?;
        if self.inner.rate_limited().await?.is_some() {
            return Ok(None);
        }

        let Some(job) = self
            .inner
            .store
            .dequeue(&self.inner.config.queue, self.inner.config.visibility_timeout)
            .await?
        else {
            return Ok(None);
        };

        self.inner.throttle.wait_turn().await;
        Ok(Some(self.inner.process(job).await))
    }
}

impl WorkerInner {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let queue = self.config.queue.clone();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = self.throttle.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let poll = match self.rate_limited().await {
                Ok(Some(wait)) => Poll::Idle(wait),
                Ok(None) => match self
                    .store
                    .dequeue(&queue, self.config.visibility_timeout)
                    .await
                {
                    Ok(Some(job)) => Poll::Job(job),
                    Ok(None) => Poll::Idle(self.config.poll_interval),
                    Err(e) => {
                        error!(queue = %queue, error = %e, "Error dequeuing job");
                        Poll::Idle(self.config.poll_interval)
                    }
                },
                Err(e) => {
                    error!(queue = %queue, error = %e, "Rate limiter unavailable");
                    Poll::Idle(self.config.poll_interval)
                }
            };

            match poll {
                Poll::Job(job) => {
                    self.throttle.wait_turn().await;
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process(job).await;
                        drop(permit);
                    });
                }
                Poll::Idle(wait) => {
                    drop(permit);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        debug!(queue = %queue, "Worker loop exited");
    }

    /// `Some(wait)` when the queue's rate limit is exhausted.
    ///
    /// Points are only spent while a job is ready to dispatch; retries that
    /// are not yet due do not count.
    async fn rate_limited(&self) -> QueueResult<Option<Duration>> {
        let Some(limiter) = &self.rate_limiter else {
            return Ok(None);
        };
        if self.store.ready_len(&self.config.queue).await? == 0 {
            return Ok(None);
        }

        let decision = limiter.limit(&self.config.queue).await?;
        if decision.allowed {
            Ok(None)
        } else {
            debug!(
                queue = %self.config.queue,
                reset = decision.reset,
                "Dispatch rate limit reached"
            );
            Ok(Some(Duration::from_secs(decision.reset.max(1))))
        }
    }

    async fn process(&self, job: QueuedJob) -> JobOutcome {
        let id = job.message_id();
        let token = match &self.lock {
            Some(lock) => match lock.try_acquire(id, self.config.visibility_timeout).await {
                Ok(Some(token)) => Some(token),
                Ok(None) => return self.defer(job).await,
                Err(e) => {
                    warn!(message_id = %id, error = %e, "Job lock unavailable");
                    return self.defer(job).await;
                }
            },
            None => None,
        };

        let outcome = self.handle(job).await;

        if let (Some(lock), Some(token)) = (&self.lock, token)
            && let Err(e) = lock.release(&token).await
        {
            warn!(message_id = %id, error = %e, "Failed to release job lock");
        }
        outcome
    }

    /// Hand a job back without counting an attempt.
    async fn defer(&self, mut job: QueuedJob) -> JobOutcome {
        let id = job.message_id();
        debug!(message_id = %id, "Job locked elsewhere, deferring");

        if let Err(e) = job.transition(JobState::Pending, None) {
            warn!(message_id = %id, error = %e, "Cannot defer job");
            return JobOutcome::Deferred;
        }
        if let Err(e) = self
            .store
            .retry(&self.config.queue, &job, self.config.lock_contention_delay)
            .await
        {
            error!(message_id = %id, error = %e, "Failed to defer job");
        }
        JobOutcome::Deferred
    }

    async fn handle(&self, mut job: QueuedJob) -> JobOutcome {
        let id = job.message_id();

        if !job.job.verify(&self.signer) {
            error!(
                alert = true,
                queue = %self.config.queue,
                message_id = %id,
                url = %job.job.url,
                "Job signature mismatch, refusing to dispatch"
            );
            self.dead_letter(&mut job, "signature mismatch").await;
            return JobOutcome::DeadLettered;
        }

        // Leases that expired mid-dispatch were counted by the store.
        if !self.config.retry_policy.should_retry(job.attempts) {
            let error = format!("lease expired after {} attempts", job.attempts);
            return self.fail_terminal(job, error, None).await;
        }

        let request = match self.build_request(&job) {
            Ok(request) => request,
            Err(e) => {
                let error = e.to_string();
                return self.fail_terminal(job, error, None).await;
            }
        };

        job.attempts += 1;
        debug!(
            message_id = %id,
            url = %job.job.url,
            attempt = job.attempts,
            "Dispatching job"
        );

        let timeout = self.config.dispatch_timeout;
        let result = tokio::time::timeout(timeout, self.dispatcher.dispatch(request))
            .await
            .unwrap_or(Err(DispatchError::Timeout(timeout)));

        match result {
            Ok(response) => self.succeed(job, response).await,
            Err(e) if e.is_retryable() && self.config.retry_policy.should_retry(job.attempts) => {
                self.retry(job, e).await
            }
            Err(e) => {
                let error = e.to_string();
                self.fail_terminal(job, error, Some(e)).await
            }
        }
    }

    fn build_request(&self, job: &QueuedJob) -> QueueResult<DispatchRequest> {
        job.job.validate()?;
        let method = job.job.http_method()?;
        let body = job.job.body.to_bytes()?;

        Ok(DispatchRequest::new(method, &job.job.url)
            .headers(&job.job.headers)
            .header(headers::RETRIED, job.attempts.to_string())
            .body(body)
            .timeout(self.config.dispatch_timeout)
            .signed(&self.signer, &job.message_id().to_string()))
    }

    async fn succeed(&self, mut job: QueuedJob, response: DispatchResponse) -> JobOutcome {
        let id = job.message_id();
        if let Err(e) = job.transition(JobState::Succeeded, None) {
            warn!(message_id = %id, error = %e, "Unexpected job state");
        }
        if let Err(e) = self.store.ack(&self.config.queue, id).await {
            error!(message_id = %id, error = %e, "Failed to acknowledge job");
        }

        info!(
            message_id = %id,
            status = response.status,
            attempts = job.attempts,
            "Job delivered"
        );

        if let Some(callback) = &job.job.callback {
            let payload = CallbackPayload::succeeded(id, &job.job.url, &response, job.attempts);
            self.send_callback(callback, &payload).await;
        }
        JobOutcome::Succeeded
    }

    async fn retry(&self, mut job: QueuedJob, e: DispatchError) -> JobOutcome {
        let id = job.message_id();
        let delay = self.config.retry_policy.delay_for_attempt(job.attempts);

        let moved = job
            .transition(JobState::FailedRetryable, Some(e.to_string()))
            .and_then(|_| job.transition(JobState::Pending, None));
        if let Err(err) = moved {
            warn!(message_id = %id, error = %err, "Unexpected job state");
        }

        warn!(
            message_id = %id,
            attempt = job.attempts,
            max_attempts = self.config.retry_policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Dispatch failed, retrying"
        );

        if let Err(err) = self.store.retry(&self.config.queue, &job, delay).await {
            error!(message_id = %id, error = %err, "Failed to schedule retry");
        }
        JobOutcome::Retrying
    }

    async fn fail_terminal(
        &self,
        mut job: QueuedJob,
        error: String,
        last: Option<DispatchError>,
    ) -> JobOutcome {
        let id = job.message_id();
        error!(
            alert = true,
            queue = %self.config.queue,
            message_id = %id,
            url = %job.job.url,
            attempts = job.attempts,
            error = %error,
            "Job failed permanently"
        );
        self.dead_letter(&mut job, &error).await;

        if let Some(failure_callback) = &job.job.failure_callback {
            let payload =
                CallbackPayload::failed(id, &job.job.url, error, last.as_ref(), job.attempts);
            self.send_callback(failure_callback, &payload).await;
        }
        JobOutcome::DeadLettered
    }

    async fn dead_letter(&self, job: &mut QueuedJob, error: &str) {
        let id = job.message_id();
        if let Err(e) = job.transition(JobState::FailedTerminal, Some(error.to_string())) {
            warn!(message_id = %id, error = %e, "Unexpected job state");
        }
        if let Err(e) = self.store.dead_letter(&self.config.queue, job, error).await {
            error!(message_id = %id, error = %e, "Failed to dead-letter job");
        }
    }

    /// Deliver a callback once; failures are logged, never retried.
    async fn send_callback(&self, url: &str, payload: &CallbackPayload) {
        let id = payload.message_id;
        let body = match payload.to_bytes() {
            Ok(body) => body,
            Err(e) => {
                warn!(message_id = %id, error = %e, "Failed to encode callback");
                return;
            }
        };

        let timeout = self.config.dispatch_timeout;
        let request = DispatchRequest::new(Method::POST, url)
            .header("Content-Type", "application/json")
            .body(body)
            .timeout(timeout)
            .signed(&self.signer, &id.to_string());

        let result = tokio::time::timeout(timeout, self.dispatcher.dispatch(request))
            .await
            .unwrap_or(Err(DispatchError::Timeout(timeout)));

        match result {
            Ok(response) => debug!(
                message_id = %id,
                callback = %url,
                status = response.status,
                "Callback delivered"
            ),
            Err(e) => warn!(
                message_id = %id,
                callback = %url,
                error = %e,
                "Callback failed"
            ),
        }
    }
}
