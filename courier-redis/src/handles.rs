//! Shared connection handles.

use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::{RedisConfig, RedisError, Result};

/// The pair of Redis connections a Courier process shares.
///
/// Both are auto-reconnecting multiplexed connections and are cheap to clone.
#[derive(Clone)]
pub struct RedisHandles {
    /// Queue storage and rate limiting.
    pub main: ConnectionManager,
    /// Distributed job locks.
    pub locker: ConnectionManager,
}

impl RedisHandles {
    /// Open both connections.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let main = open(config, "main").await?;
        let locker = open(config, "locker").await?;

        info!(url = %config.url, "Connected to Redis");

        Ok(Self { main, locker })
    }

    /// Build handles from existing connections.
    pub fn from_connections(main: ConnectionManager, locker: ConnectionManager) -> Self {
        Self { main, locker }
    }

    /// PING both connections.
    pub async fn health_check(&self) -> Result<()> {
        ping(&mut self.main.clone()).await?;
        ping(&mut self.locker.clone()).await?;
        Ok(())
    }

    /// Release the handles.
    ///
    /// Connections close once every clone handed out to components has been
    /// dropped, so callers shut down workers before calling this.
    pub fn shutdown(self) {
        info!("Closing Redis handles");
        drop(self);
    }
}

async fn open(config: &RedisConfig, role: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.connection_url())
        .map_err(|e| RedisError::Config(e.to_string()))?;

    let mut conn = tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(e.to_string()))?;

    if let Some(name) = &config.connection_name {
        let _: () = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(format!("{}-{}", name, role))
            .query_async(&mut conn)
            .await?;
    }

    debug!(role, "Opened Redis connection");
    Ok(conn)
}

async fn ping(conn: &mut ConnectionManager) -> Result<()> {
    let _: String = redis::cmd("PING")
        .query_async(conn)
        .await
        .map_err(|e| RedisError::Connection(e.to_string()))?;
    Ok(())
}
