//! Integration tests for courier-config

use courier_config::*;
use std::env;
use std::io::Write;

#[test]
fn test_env_loader_with_prefix() {
    let loader = EnvLoader::new(Some("COURIERIT".to_string()));

    unsafe {
        env::set_var("COURIERIT_REDIS_URL", "redis://cache:6379");
    }

    let result = loader.load_var("REDIS_URL");
    assert_eq!(result.unwrap(), "redis://cache:6379");

    unsafe {
        env::remove_var("COURIERIT_REDIS_URL");
    }
}

#[test]
fn test_from_env_with_prefix() {
    unsafe {
        env::set_var("COURIERENV_SIGNING_KEY", "env-key");
        env::set_var("COURIERENV_ENV", "production");
        env::set_var("COURIERENV_QUEUE_NAME", "emails");
        env::set_var("COURIERENV_MIN_INTERVAL_MS", "250");
        env::set_var("COURIERENV_RATE_LIMIT_POINTS", "5");
    }

    let config = CourierConfig::from_env_with_prefix("COURIERENV").unwrap();
    assert_eq!(config.signing_key().unwrap(), "env-key");
    assert_eq!(config.runtime, RuntimeEnvironment::Production);
    assert_eq!(config.queue_name, "emails");
    assert_eq!(config.worker.min_interval_ms, 250);
    assert_eq!(
        config.worker.rate_limit,
        Some(RateLimitSettings {
            points: 5,
            window_secs: 10
        })
    );

    unsafe {
        env::remove_var("COURIERENV_SIGNING_KEY");
        env::remove_var("COURIERENV_ENV");
        env::remove_var("COURIERENV_QUEUE_NAME");
        env::remove_var("COURIERENV_MIN_INTERVAL_MS");
        env::remove_var("COURIERENV_RATE_LIMIT_POINTS");
    }
}

#[test]
fn test_invalid_env_number() {
    unsafe {
        env::set_var("COURIERBAD_MAX_ATTEMPTS", "lots");
    }

    let result = CourierConfig::from_env_with_prefix("COURIERBAD");
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

    unsafe {
        env::remove_var("COURIERBAD_MAX_ATTEMPTS");
    }
}

#[test]
fn test_from_toml_file() {
    let dir = env::temp_dir();
    let path = dir.join(format!("courier-config-{}.toml", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
signing_key = "file-key"
queue_name = "webhooks"
base_url = "https://app.example.com"

[worker]
max_concurrent = 4
max_attempts = 5
"#
    )
    .unwrap();

    let config = CourierConfig::from_file(&path).unwrap();
    assert_eq!(config.queue_name, "webhooks");
    assert_eq!(config.base_url.as_deref(), Some("https://app.example.com"));
    assert_eq!(config.worker.max_concurrent, 4);
    assert_eq!(config.worker.max_attempts, 5);
    assert_eq!(config.worker.min_interval_ms, 100);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_validation_rejects_bad_base_url() {
    let config = CourierConfig {
        base_url: Some("app.example.com".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(_))
    ));
}
