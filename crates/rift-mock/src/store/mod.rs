//! Named key-value stores used by scripts to keep state across calls.
//!
//! A [`StoreFactory`] resolves a store name to a [`Store`], creating it on
//! first access. Values are JSON so every script engine can exchange them.
//! The traits are synchronous because script engines call them from
//! synchronous native functions; the redis backend uses a blocking pooled
//! client for the same reason.

mod inmemory;
mod prefixed;
#[cfg(feature = "redis-backend")]
mod redis_store;
mod service;

pub use inmemory::{InMemoryStore, InMemoryStoreFactory};
pub use prefixed::PrefixedKeyStore;
#[cfg(feature = "redis-backend")]
pub use redis_store::{RedisStore, RedisStoreFactory};
pub use service::{
    RequestStores, StoreLifecycleListener, StoreService, REQUEST_STORE_NAME, STORES_BINDING,
};

use crate::config::{StoreConfig, StoreDriver};
use crate::error::StoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A named mapping from string keys to JSON values.
pub trait Store: Send + Sync {
    fn name(&self) -> &str;

    fn save(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    fn load_all(&self) -> Result<HashMap<String, Value>, StoreError>;

    fn has_item_with_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.load(key)?.is_some())
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.load_all()?.len())
    }

    /// Short description for logs, e.g. `inmemory(orders)`.
    fn type_description(&self) -> String;
}

/// Resolves store names to stores, creating each store once.
pub trait StoreFactory: Send + Sync {
    fn get_store_by_name(&self, name: &str) -> Result<Arc<dyn Store>, StoreError>;

    fn has_store_with_name(&self, name: &str) -> bool;

    /// Drop the store and everything in it. Unknown names are a no-op.
    fn delete_store_by_name(&self, name: &str) -> Result<(), StoreError>;

    /// Names of the stores created so far.
    fn store_names(&self) -> Vec<String>;

    fn type_description(&self) -> &'static str;
}

/// Create the store factory for the configured driver.
///
/// Remote backends are connected here so an unreachable backend fails at
/// startup, not on first use.
pub fn create_store_factory(config: &StoreConfig) -> Result<Arc<dyn StoreFactory>, StoreError> {
    let expiry = config.effective_expiry();
    match config.driver {
        StoreDriver::InMemory => {
            tracing::info!("Using in-memory store backend (expiry={:?}s)", expiry);
            Ok(Arc::new(InMemoryStoreFactory::new(
                expiry.map(std::time::Duration::from_secs),
            )))
        }
        StoreDriver::Redis => {
            let redis_config = config.redis.as_ref().ok_or_else(|| {
                StoreError::Unavailable(
                    "redis store driver selected but no redis config provided".to_string(),
                )
            })?;

            #[cfg(feature = "redis-backend")]
            {
                let factory = RedisStoreFactory::connect(redis_config, expiry)?;
                tracing::info!(
                    "Using redis store backend (url={}, expiry={:?}s)",
                    redis_config.url,
                    expiry
                );
                Ok(Arc::new(factory))
            }

            #[cfg(not(feature = "redis-backend"))]
            {
                let _ = redis_config;
                Err(StoreError::DriverDisabled {
                    driver: StoreDriver::Redis.as_str().to_string(),
                    feature: "redis-backend",
                })
            }
        }
    }
}
