// Environment variable loading

use crate::{ConfigError, Result};
use std::env;
use std::str::FromStr;

/// Environment variable loader
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Build the full variable name for a key
    pub fn var_name(&self, key: &str) -> String {
        if let Some(ref prefix) = self.prefix {
            format!("{}_{}", prefix, key.to_uppercase())
        } else {
            key.to_uppercase()
        }
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.var_name(key)).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Load a variable if it is set and non-empty
    pub fn get(&self, key: &str) -> Option<String> {
        self.load_var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Load and parse a variable, `Ok(None)` when it is not set
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: self.var_name(key),
                    value: raw,
                }),
            None => Ok(None),
        }
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // std::env::set_var is unsafe in edition 2024, so every test owns a unique
    // variable name.

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("COURIER_TEST".to_string()));
        assert!(loader.load_var("MISSING_VAR_67890").is_err());
        assert!(loader.get("MISSING_VAR_67890").is_none());
    }

    #[test]
    fn test_var_name_with_prefix() {
        let loader = EnvLoader::new(Some("COURIER".to_string()));
        assert_eq!(loader.var_name("queue"), "COURIER_QUEUE");

        let bare = EnvLoader::default();
        assert_eq!(bare.var_name("redis_url"), "REDIS_URL");
    }

    #[test]
    fn test_parse_number() {
        unsafe {
            std::env::set_var("COURIER_ENVTEST_POINTS", "42");
        }
        let loader = EnvLoader::new(Some("COURIER_ENVTEST".to_string()));
        let parsed: Option<u64> = loader.parse("POINTS").unwrap();
        assert_eq!(parsed, Some(42));

        unsafe {
            std::env::remove_var("COURIER_ENVTEST_POINTS");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        unsafe {
            std::env::set_var("COURIER_ENVBAD_POINTS", "many");
        }
        let loader = EnvLoader::new(Some("COURIER_ENVBAD".to_string()));
        let err = loader.parse::<u64>("POINTS").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "COURIER_ENVBAD_POINTS"));

        unsafe {
            std::env::remove_var("COURIER_ENVBAD_POINTS");
        }
    }

    #[test]
    fn test_blank_value_is_unset() {
        unsafe {
            std::env::set_var("COURIER_ENVBLANK_QUEUE", "  ");
        }
        let loader = EnvLoader::new(Some("COURIER_ENVBLANK".to_string()));
        assert!(loader.get("QUEUE").is_none());

        unsafe {
            std::env::remove_var("COURIER_ENVBLANK_QUEUE");
        }
    }
}
