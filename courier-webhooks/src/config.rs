//! Configuration for the dispatch client

use std::time::Duration;

/// Configuration for [`crate::HttpDispatcher`]
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Default timeout for requests without their own
    pub timeout: Duration,

    /// User-Agent header for outgoing requests
    pub user_agent: String,

    /// Maximum request body size in bytes
    pub max_payload_size: usize,

    /// Response bodies are truncated to this many bytes
    pub max_response_body: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("Courier/{}", env!("CARGO_PKG_VERSION")),
            max_payload_size: 1024 * 1024, // 1MB
            max_response_body: 64 * 1024,
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::new()
    }
}

/// Builder for DispatchConfig
#[derive(Debug, Clone, Default)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl DispatchConfigBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            config: DispatchConfig::default(),
        }
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout = Duration::from_secs(secs);
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set maximum payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Set the response body truncation limit
    pub fn max_response_body(mut self, size: usize) -> Self {
        self.config.max_response_body = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> DispatchConfig {
        self.config
    }
}
