// Runtime environment detection

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment environment the process runs in.
///
/// Inbound signature verification is only relaxed outside production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    Production,
    #[default]
    Development,
    Test,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnvironment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeEnvironment::Production => "production",
            RuntimeEnvironment::Development => "development",
            RuntimeEnvironment::Test => "test",
        }
    }
}

impl FromStr for RuntimeEnvironment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(RuntimeEnvironment::Production),
            "development" | "dev" => Ok(RuntimeEnvironment::Development),
            "test" | "testing" => Ok(RuntimeEnvironment::Test),
            other => Err(ConfigError::InvalidValue {
                key: "runtime".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RuntimeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_runtime() {
        assert_eq!(
            "production".parse::<RuntimeEnvironment>().unwrap(),
            RuntimeEnvironment::Production
        );
        assert_eq!(
            "Dev".parse::<RuntimeEnvironment>().unwrap(),
            RuntimeEnvironment::Development
        );
        assert_eq!(
            "test".parse::<RuntimeEnvironment>().unwrap(),
            RuntimeEnvironment::Test
        );
        assert!("staging".parse::<RuntimeEnvironment>().is_err());
    }

    #[test]
    fn test_only_production_is_production() {
        assert!(RuntimeEnvironment::Production.is_production());
        assert!(!RuntimeEnvironment::Development.is_production());
        assert!(!RuntimeEnvironment::Test.is_production());
        assert_eq!(RuntimeEnvironment::default(), RuntimeEnvironment::Development);
    }
}
