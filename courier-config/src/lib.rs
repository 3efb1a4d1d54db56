//! Configuration for Courier.
//!
//! `CourierConfig` gathers everything a publisher or worker process needs:
//! the signing key, the runtime environment, the Redis connection and the
//! worker's throttling and retry settings. Values come from the environment
//! (optionally seeded from a `.env` file) or from a TOML/JSON file, with the
//! environment taking precedence.
//!
//! ```no_run
//! use courier_config::CourierConfig;
//!
//! let config = CourierConfig::from_env()?;
//! println!("draining queue {}", config.queue_name);
//! # Ok::<(), courier_config::ConfigError>(())
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod runtime;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use runtime::RuntimeEnvironment;
pub use validation::{ConfigValidator, Validate};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Signing key used outside production when none is configured.
pub const DEVELOPMENT_SIGNING_KEY: &str = "supersecret";

/// Default environment variable prefix.
pub const ENV_PREFIX: &str = "COURIER";

/// Top-level Courier configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// HMAC key for job and webhook signatures.
    pub signing_key: Option<String>,
    pub runtime: RuntimeEnvironment,
    pub redis_url: String,
    /// Prefix for every Redis key Courier writes.
    pub key_prefix: String,
    pub queue_name: String,
    /// Base URL that relative job and callback URLs resolve against.
    pub base_url: Option<String>,
    /// Verify inbound signatures even outside production.
    pub enforce_verification: bool,
    pub worker: WorkerSettings,
}

/// Worker throttling, timeout and retry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub max_concurrent: usize,
    pub min_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub rate_limit: Option<RateLimitSettings>,
}

/// Queue-wide dispatch rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub points: u32,
    pub window_secs: u64,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            runtime: RuntimeEnvironment::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "courier".to_string(),
            queue_name: "jobs".to_string(),
            base_url: None,
            enforce_verification: false,
            worker: WorkerSettings::default(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            min_interval_ms: 100,
            poll_interval_ms: 1000,
            visibility_timeout_secs: 90,
            dispatch_timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            rate_limit: None,
        }
    }
}

impl WorkerSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl fmt::Debug for CourierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CourierConfig")
            .field(
                "signing_key",
                &self.signing_key.as_ref().map(|_| "[redacted]"),
            )
            .field("runtime", &self.runtime)
            .field("redis_url", &self.redis_url)
            .field("key_prefix", &self.key_prefix)
            .field("queue_name", &self.queue_name)
            .field("base_url", &self.base_url)
            .field("enforce_verification", &self.enforce_verification)
            .field("worker", &self.worker)
            .finish()
    }
}

impl CourierConfig {
    /// Load from the environment, reading `.env` first when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Load from the environment using a custom variable prefix.
    ///
    /// The unprefixed `QSTASH_SIGNING_KEY`, `REDIS_URL`, `NODE_ENV` and
    /// `NEXT_PUBLIC_BASE_URL` variables are honoured as fallbacks so existing
    /// deployments keep working.
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(&EnvLoader::new(Some(prefix.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML or JSON file, then overlay the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::auto(path.as_ref())?;
        let mut config: Self = loader.load_file(path)?;
        config.apply_env(&EnvLoader::new(Some(ENV_PREFIX.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the environment onto this configuration.
    pub fn apply_env(&mut self, env: &EnvLoader) -> Result<()> {
        let bare = EnvLoader::default();

        if let Some(key) = env.get("SIGNING_KEY").or_else(|| bare.get("QSTASH_SIGNING_KEY")) {
            self.signing_key = Some(key);
        }
        if let Some(runtime) = env.get("ENV").or_else(|| bare.get("NODE_ENV")) {
            self.runtime = runtime.parse()?;
        }
        if let Some(url) = env.get("REDIS_URL").or_else(|| bare.get("REDIS_URL")) {
            self.redis_url = url;
        }
        if let Some(prefix) = env.get("KEY_PREFIX") {
            self.key_prefix = prefix;
        }
        if let Some(queue) = env.get("QUEUE_NAME") {
            self.queue_name = queue;
        }
        if let Some(base) = env.get("BASE_URL").or_else(|| bare.get("NEXT_PUBLIC_BASE_URL")) {
            self.base_url = Some(base);
        }
        if let Some(enforce) = env.parse("ENFORCE_VERIFICATION")? {
            self.enforce_verification = enforce;
        }

        let worker = &mut self.worker;
        if let Some(v) = env.parse("MAX_CONCURRENT")? {
            worker.max_concurrent = v;
        }
        if let Some(v) = env.parse("MIN_INTERVAL_MS")? {
            worker.min_interval_ms = v;
        }
        if let Some(v) = env.parse("POLL_INTERVAL_MS")? {
            worker.poll_interval_ms = v;
        }
        if let Some(v) = env.parse("VISIBILITY_TIMEOUT_SECS")? {
            worker.visibility_timeout_secs = v;
        }
        if let Some(v) = env.parse("DISPATCH_TIMEOUT_SECS")? {
            worker.dispatch_timeout_secs = v;
        }
        if let Some(v) = env.parse("MAX_ATTEMPTS")? {
            worker.max_attempts = v;
        }
        if let Some(v) = env.parse("INITIAL_BACKOFF_MS")? {
            worker.initial_backoff_ms = v;
        }
        if let Some(v) = env.parse("MAX_BACKOFF_MS")? {
            worker.max_backoff_ms = v;
        }
        if let Some(v) = env.parse("BACKOFF_MULTIPLIER")? {
            worker.backoff_multiplier = v;
        }

        let points: Option<u32> = env.parse("RATE_LIMIT_POINTS")?;
        let window: Option<u64> = env.parse("RATE_LIMIT_WINDOW_SECS")?;
        if let Some(points) = points {
            worker.rate_limit = Some(RateLimitSettings {
                points,
                window_secs: window.unwrap_or(10),
            });
        }

        Ok(())
    }

    /// The signing key to use, falling back to the development key outside
    /// production.
    pub fn signing_key(&self) -> Result<&str> {
        match self.signing_key.as_deref() {
            Some(key) => Ok(key),
            None if self.runtime.is_production() => Err(ConfigError::ValidationError(
                "signing_key must be set in production".to_string(),
            )),
            None => Ok(DEVELOPMENT_SIGNING_KEY),
        }
    }

    /// Whether inbound requests must carry a valid signature.
    pub fn verification_required(&self) -> bool {
        self.runtime.is_production() || self.enforce_verification
    }
}

impl Validate for CourierConfig {
    fn validate(&self) -> Result<()> {
        if let Some(key) = &self.signing_key {
            ConfigValidator::not_empty(key, "signing_key")?;
        }
        self.signing_key()?;

        ConfigValidator::is_redis_url(&self.redis_url, "redis_url")?;
        ConfigValidator::not_empty(&self.key_prefix, "key_prefix")?;
        ConfigValidator::not_empty(&self.queue_name, "queue_name")?;
        if let Some(base) = &self.base_url {
            ConfigValidator::is_url(base, "base_url")?;
        }

        self.worker.validate()
    }
}

impl Validate for WorkerSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::in_range(self.max_concurrent, 1, 1024, "worker.max_concurrent")?;
        ConfigValidator::in_range(self.max_attempts, 1, 100, "worker.max_attempts")?;
        ConfigValidator::in_range(
            self.dispatch_timeout_secs,
            1,
            3600,
            "worker.dispatch_timeout_secs",
        )?;

        if self.visibility_timeout_secs <= self.dispatch_timeout_secs {
            return Err(ConfigError::ValidationError(
                "worker.visibility_timeout_secs must exceed worker.dispatch_timeout_secs"
                    .to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "worker.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "worker.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "worker.max_backoff_ms must not be less than worker.initial_backoff_ms"
                    .to_string(),
            ));
        }
        if let Some(limit) = &self.rate_limit {
            if limit.points == 0 || limit.window_secs == 0 {
                return Err(ConfigError::ValidationError(
                    "worker.rate_limit points and window_secs must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}
