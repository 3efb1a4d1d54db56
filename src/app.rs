//! Wiring a configured Courier instance.

use crate::Result;
use courier_config::{CourierConfig, Validate};
use courier_queue::{
    JobLock, MemoryJobLock, MemoryQueueStore, Publisher, QueueStore, RedisJobLock,
    RedisQueueStore, Worker, WorkerConfig,
};
use courier_ratelimit::{RateLimitResult, RateLimiter};
use courier_redis::{RedisConfig, RedisHandles};
use courier_webhooks::{Dispatch, DispatchConfig, HttpDispatcher, InboundVerifier, Signer};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A configured Courier process: one store, one signer, one queue.
///
/// Handles are created once here and passed to every component, so a
/// process holds exactly one Redis connection pair.
pub struct Courier {
    config: CourierConfig,
    signer: Signer,
    store: Arc<dyn QueueStore>,
    publisher: Publisher,
    redis: Option<RedisHandles>,
    lock: Arc<dyn JobLock>,
}

impl Courier {
    /// Validate the configuration and connect to Redis.
    pub async fn connect(config: CourierConfig) -> Result<Self> {
        config.validate()?;

        let handles = RedisHandles::connect(&RedisConfig::new(&config.redis_url)).await?;
        let store: Arc<dyn QueueStore> =
            Arc::new(RedisQueueStore::from_handles(&handles, &config.key_prefix));
        let lock: Arc<dyn JobLock> =
            Arc::new(RedisJobLock::from_handles(&handles, &config.key_prefix));

        info!(
            queue = %config.queue_name,
            prefix = %config.key_prefix,
            runtime = %config.runtime,
            "Courier connected"
        );

        Self::assemble(config, store, lock, Some(handles))
    }

    /// Build an instance backed by process memory.
    pub fn in_memory(config: CourierConfig) -> Result<Self> {
        config.validate()?;
        Self::assemble(
            config,
            Arc::new(MemoryQueueStore::new()),
            Arc::new(MemoryJobLock::new()),
            None,
        )
    }

    fn assemble(
        config: CourierConfig,
        store: Arc<dyn QueueStore>,
        lock: Arc<dyn JobLock>,
        redis: Option<RedisHandles>,
    ) -> Result<Self> {
        let signer = Signer::new(config.signing_key()?)?;

        let mut publisher = Publisher::new(store.clone(), signer.clone(), &config.queue_name);
        if let Some(base) = &config.base_url {
            publisher = publisher.with_base_url(base)?;
        }

        Ok(Self {
            config,
            signer,
            store,
            publisher,
            redis,
            lock,
        })
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    /// Redis handles, when connected.
    pub fn redis(&self) -> Option<&RedisHandles> {
        self.redis.as_ref()
    }

    /// A sliding-window limiter sharing this instance's storage.
    pub fn rate_limiter(&self, points: u64, window: Duration) -> RateLimitResult<RateLimiter> {
        let builder = RateLimiter::builder()
            .points(points)
            .window(window)
            .key_prefix(format!("{}:ratelimit", self.config.key_prefix));

        match &self.redis {
            Some(handles) => builder.redis_store(handles.main.clone()).build(),
            None => builder.memory_store().build(),
        }
    }

    /// A worker for this instance's queue using `dispatcher`.
    ///
    /// The worker is not started.
    pub fn worker(&self, dispatcher: Arc<dyn Dispatch>) -> Result<Worker> {
        let settings = &self.config.worker;
        let config = WorkerConfig::from_settings(&self.config.queue_name, settings);

        let mut builder = Worker::builder(self.store.clone(), dispatcher, self.signer.clone())
            .config(config)
            .lock(self.lock.clone());

        if let Some(limit) = settings.rate_limit {
            let limiter = self.rate_limiter(
                u64::from(limit.points),
                Duration::from_secs(limit.window_secs),
            )?;
            builder = builder.rate_limiter(limiter);
        }

        Ok(builder.build())
    }

    /// A worker that dispatches over HTTP.
    pub fn http_worker(&self) -> Result<Worker> {
        let dispatch_config = DispatchConfig::builder()
            .timeout(self.config.worker.dispatch_timeout())
            .build();
        let dispatcher = Arc::new(HttpDispatcher::new(dispatch_config)?);
        self.worker(dispatcher)
    }

    /// Verifier for requests delivered to this application.
    pub fn inbound_verifier(&self) -> InboundVerifier {
        InboundVerifier::new(self.signer.clone(), self.config.runtime)
            .enforce(self.config.enforce_verification)
    }

    /// Release shared connections.
    ///
    /// Stop workers first; they hold clones of the store.
    pub fn shutdown(self) {
        if let Some(handles) = self.redis {
            handles.shutdown();
        }
        info!("Courier stopped");
    }
}
