//! Configuration types for the Rift mock engine.

mod resource;
mod scripting;
mod store;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use resource::{
    MatchOperator, PluginConfig, RequestBodyConfig, ResourceConfig, ResponseConfig, ValueMatch,
};
pub use scripting::{ScriptCacheConfig, ScriptEngineConfig};
pub use store::{RedisConfig, StoreConfig, StoreDriver, DEFAULT_REMOTE_EXPIRY_SECONDS};

/// Store driver override
pub const ENV_STORE_DRIVER: &str = "RIFT_STORE_DRIVER";
/// Store item expiry in seconds, negative disables expiry
pub const ENV_STORE_EXPIRY: &str = "RIFT_STORE_EXPIRY";
/// Redis connection URL override
pub const ENV_STORE_REDIS_URL: &str = "RIFT_STORE_REDIS_URL";
/// Compiled script cache size override
pub const ENV_SCRIPT_CACHE_ENTRIES: &str = "RIFT_SCRIPT_CACHE_ENTRIES";

/// Engine-wide configuration: script engines, the compiled-script cache and
/// the store backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub script_engine: ScriptEngineConfig,
    #[serde(default)]
    pub script_cache: ScriptCacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&contents)?;
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RIFT_*` environment overrides on top of file values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::with_env_overrides`] with an explicit lookup,
    /// so tests do not need to touch the process environment.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(driver) = lookup(ENV_STORE_DRIVER) {
            self.store.driver = match driver.to_ascii_lowercase().as_str() {
                "inmemory" | "in-memory" | "inmem" => StoreDriver::InMemory,
                "redis" => StoreDriver::Redis,
                _ => return Err(ConfigError::UnknownStoreDriver(driver)),
            };
        }

        if let Some(expiry) = lookup(ENV_STORE_EXPIRY) {
            let seconds = expiry
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_STORE_EXPIRY,
                    value: expiry.clone(),
                })?;
            self.store.expiry_seconds = Some(seconds);
        }

        if let Some(url) = lookup(ENV_STORE_REDIS_URL) {
            match self.store.redis.as_mut() {
                Some(redis) => redis.url = url,
                None => self.store.redis = Some(RedisConfig::new(url)),
            }
        }

        if let Some(entries) = lookup(ENV_SCRIPT_CACHE_ENTRIES) {
            self.script_cache.max_entries =
                entries
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidEnv {
                        name: ENV_SCRIPT_CACHE_ENTRIES,
                        value: entries.clone(),
                    })?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script_cache.max_entries == 0 {
            return Err(ConfigError::InvalidEnv {
                name: ENV_SCRIPT_CACHE_ENTRIES,
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.script_engine.engine, "rhai");
        assert_eq!(config.script_cache.max_entries, 20);
        assert_eq!(config.store.driver, StoreDriver::InMemory);
    }

    #[test]
    fn test_env_overrides_expiry_and_cache() {
        let config = EngineConfig::default()
            .with_overrides_from(lookup(&[
                (ENV_STORE_EXPIRY, "60"),
                (ENV_SCRIPT_CACHE_ENTRIES, "3"),
            ]))
            .unwrap();
        assert_eq!(config.store.expiry_seconds, Some(60));
        assert_eq!(config.script_cache.max_entries, 3);
    }

    #[test]
    fn test_env_override_redis_url_creates_config() {
        let config = EngineConfig::default()
            .with_overrides_from(lookup(&[
                (ENV_STORE_DRIVER, "redis"),
                (ENV_STORE_REDIS_URL, "redis://cache:6379"),
            ]))
            .unwrap();
        assert_eq!(config.store.driver, StoreDriver::Redis);
        assert_eq!(config.store.redis.unwrap().url, "redis://cache:6379");
    }

    #[test]
    fn test_env_override_invalid_values() {
        let err = EngineConfig::default()
            .with_overrides_from(lookup(&[(ENV_STORE_EXPIRY, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = EngineConfig::default()
            .with_overrides_from(lookup(&[(ENV_STORE_DRIVER, "memcached")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStoreDriver(_)));
    }

    #[test]
    fn test_zero_cache_entries_rejected() {
        let mut config = EngineConfig::default();
        config.script_cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_file_reads_process_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "scriptCache:\n  maxEntries: 7\n").unwrap();

        std::env::set_var(ENV_STORE_EXPIRY, "-1");
        let config = EngineConfig::from_file(&path);
        std::env::remove_var(ENV_STORE_EXPIRY);

        let config = config.unwrap();
        assert_eq!(config.script_cache.max_entries, 7);
        assert_eq!(config.store.expiry_seconds, Some(-1));
        assert_eq!(config.store.effective_expiry(), None);
    }
}
