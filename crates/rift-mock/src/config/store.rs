//! Store backend configuration.

use serde::{Deserialize, Serialize};

/// Expiry applied by remote backends when none is configured.
pub const DEFAULT_REMOTE_EXPIRY_SECONDS: i64 = 1800;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreDriver {
    #[default]
    #[serde(alias = "in-memory", alias = "inmem")]
    InMemory,
    Redis,
}

impl StoreDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreDriver::InMemory => "inmemory",
            StoreDriver::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub driver: StoreDriver,
    /// Item expiry in seconds. Negative means no expiry; unset means the
    /// backend default (none for in-memory, 1800s for redis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            driver: StoreDriver::InMemory,
            expiry_seconds: None,
            redis: None,
        }
    }
}

impl StoreConfig {
    /// Effective expiry for the configured driver, `None` meaning never expire.
    pub fn effective_expiry(&self) -> Option<u64> {
        let seconds = match (self.driver, self.expiry_seconds) {
            (_, Some(s)) => s,
            (StoreDriver::InMemory, None) => -1,
            (StoreDriver::Redis, None) => DEFAULT_REMOTE_EXPIRY_SECONDS,
        };
        u64::try_from(seconds).ok()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_key_prefix() -> String {
    "rift:".to_string()
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: default_redis_pool_size(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inmemory_never_expires_by_default() {
        let config = StoreConfig::default();
        assert_eq!(config.effective_expiry(), None);
    }

    #[test]
    fn test_redis_default_expiry() {
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            ..Default::default()
        };
        assert_eq!(config.effective_expiry(), Some(1800));
    }

    #[test]
    fn test_negative_expiry_disables_expiry() {
        let config = StoreConfig {
            driver: StoreDriver::Redis,
            expiry_seconds: Some(-1),
            redis: None,
        };
        assert_eq!(config.effective_expiry(), None);
    }

    #[test]
    fn test_driver_aliases() {
        let config: StoreConfig = serde_yaml::from_str("driver: in-memory").unwrap();
        assert_eq!(config.driver, StoreDriver::InMemory);
        let config: StoreConfig =
            serde_yaml::from_str("driver: redis\nredis:\n  url: redis://localhost:6379").unwrap();
        assert_eq!(config.driver, StoreDriver::Redis);
        let redis = config.redis.unwrap();
        assert_eq!(redis.pool_size, 10);
        assert_eq!(redis.key_prefix, "rift:");
    }
}
