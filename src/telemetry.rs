//! Logging setup.
//!
//! Every Courier crate logs through `tracing` with structured fields
//! (`message_id`, `queue`, `url`). Terminal failures and rejected signatures
//! carry `alert = true` so log pipelines can page on them.
//!
//! # Environment Variables
//!
//! - `COURIER_LOG_LEVEL=trace|debug|info|warn|error` or any `EnvFilter` directive
//! - `COURIER_LOG_FORMAT=json|pretty|compact`
//! - `RUST_LOG` overrides `COURIER_LOG_LEVEL` when set

use crate::{CourierError, Result};
use courier_config::{ENV_PREFIX, EnvLoader};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Multi-line, human readable
    Pretty,
    /// Single-line, human readable
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info` or `courier_queue=debug,info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogSettings {
    /// Read `COURIER_LOG_LEVEL` and `COURIER_LOG_FORMAT`.
    pub fn from_env() -> Result<Self> {
        Self::from_loader(&EnvLoader::new(Some(ENV_PREFIX.to_string())))
    }

    pub fn from_loader(env: &EnvLoader) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            level: env.get("LOG_LEVEL").unwrap_or(defaults.level),
            format: env.parse("LOG_FORMAT")?.unwrap_or(defaults.format),
        })
    }

    fn filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.level)
                .map_err(|e| CourierError::Telemetry(format!("invalid log level: {e}"))),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Fails if the level directive is invalid or a subscriber is already set.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let filter = settings.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match settings.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };

    result.map_err(|e| CourierError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_settings_from_loader() {
        let env = EnvLoader::new(Some("COURIER_TELEMETRY_TEST".to_string()));
        unsafe {
            std::env::set_var("COURIER_TELEMETRY_TEST_LOG_LEVEL", "debug");
            std::env::set_var("COURIER_TELEMETRY_TEST_LOG_FORMAT", "pretty");
        }

        let settings = LogSettings::from_loader(&env).unwrap();
        assert_eq!(settings.level, "debug");
        assert_eq!(settings.format, LogFormat::Pretty);
    }

    #[test]
    fn test_settings_defaults() {
        let env = EnvLoader::new(Some("COURIER_TELEMETRY_UNSET".to_string()));
        assert_eq!(LogSettings::from_loader(&env).unwrap(), LogSettings::default());
    }

    #[test]
    fn test_invalid_format_is_an_error() {
        let env = EnvLoader::new(Some("COURIER_TELEMETRY_BAD".to_string()));
        unsafe {
            std::env::set_var("COURIER_TELEMETRY_BAD_LOG_FORMAT", "xml");
        }
        assert!(LogSettings::from_loader(&env).is_err());
    }
}
