//! Integration tests for courier-redis
//!
//! These need a running Redis at `REDIS_URL` (default localhost).

use courier_redis::*;
use std::time::Duration;

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_connect_and_health_check() {
    let config = RedisConfig::from_env().build();
    let handles = RedisHandles::connect(&config).await.unwrap();

    handles.health_check().await.unwrap();
    handles.shutdown();
}

#[tokio::test]
async fn test_invalid_url_is_config_error() {
    let config = RedisConfig::new("not a url");
    let result = RedisHandles::connect(&config).await;
    assert!(matches!(result, Err(RedisError::Config(_))));
}

#[tokio::test]
#[ignore] // Requires an unroutable address to time out
async fn test_connect_timeout() {
    let config = RedisConfig::builder()
        .url("redis://10.255.255.1:6379")
        .connection_timeout(Duration::from_millis(100))
        .build();
    let result = RedisHandles::connect(&config).await;
    assert!(result.is_err());
}
