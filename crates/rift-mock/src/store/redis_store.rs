//! Redis store backend.
//!
//! Each store is one Redis hash (`<prefix>store:<name>`) holding
//! JSON-encoded values. When an expiry is configured, every write refreshes
//! the hash's TTL, so a store disappears once it has been idle that long.

use super::{Store, StoreFactory};
use crate::config::RedisConfig;
use crate::error::StoreError;
use parking_lot::RwLock;
use redis::{Commands, Connection, ConnectionLike};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct RedisConnectionManager {
    client: redis::Client,
}

impl r2d2::ManageConnection for RedisConnectionManager {
    type Connection = Connection;
    type Error = redis::RedisError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.client.get_connection()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        redis::cmd("PING").query::<String>(conn).map(|_| ())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !conn.is_open()
    }
}

type Pool = r2d2::Pool<RedisConnectionManager>;

fn hash_key(prefix: &str, name: &str) -> String {
    format!("{prefix}store:{name}")
}

pub struct RedisStore {
    name: String,
    hash_key: String,
    pool: Arc<Pool>,
    expiry_seconds: Option<u64>,
}

impl RedisStore {
    fn connection(
        &self,
        operation: &'static str,
    ) -> Result<r2d2::PooledConnection<RedisConnectionManager>, StoreError> {
        self.pool.get().map_err(|e| self.op_error(operation, e))
    }

    fn op_error(&self, operation: &'static str, e: impl std::fmt::Display) -> StoreError {
        StoreError::Operation {
            store: self.name.clone(),
            operation,
            message: e.to_string(),
        }
    }

    fn decode(&self, raw: &str) -> Result<Value, StoreError> {
        serde_json::from_str(raw).map_err(|source| StoreError::Codec {
            store: self.name.clone(),
            source,
        })
    }
}

impl Store for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn save(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(&value).map_err(|source| StoreError::Codec {
            store: self.name.clone(),
            source,
        })?;
        let mut conn = self.connection("save")?;

        let _: () = conn
            .hset(&self.hash_key, key, encoded)
            .map_err(|e| self.op_error("save", e))?;

        if let Some(seconds) = self.expiry_seconds {
            let _: () = redis::cmd("EXPIRE")
                .arg(&self.hash_key)
                .arg(seconds)
                .query(&mut *conn)
                .map_err(|e| self.op_error("expire", e))?;
        }
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut conn = self.connection("load")?;
        let raw: Option<String> = conn
            .hget(&self.hash_key, key)
            .map_err(|e| self.op_error("load", e))?;
        raw.map(|r| self.decode(&r)).transpose()
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection("delete")?;
        let _: () = conn
            .hdel(&self.hash_key, key)
            .map_err(|e| self.op_error("delete", e))?;
        Ok(())
    }

    fn load_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        let mut conn = self.connection("load_all")?;
        let raw: HashMap<String, String> = conn
            .hgetall(&self.hash_key)
            .map_err(|e| self.op_error("load_all", e))?;
        raw.into_iter()
            .map(|(k, v)| Ok((k, self.decode(&v)?)))
            .collect()
    }

    fn has_item_with_key(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection("has_item_with_key")?;
        conn.hexists(&self.hash_key, key)
            .map_err(|e| self.op_error("has_item_with_key", e))
    }

    fn count(&self) -> Result<usize, StoreError> {
        let mut conn = self.connection("count")?;
        conn.hlen(&self.hash_key)
            .map_err(|e| self.op_error("count", e))
    }

    fn type_description(&self) -> String {
        format!("redis({})", self.name)
    }
}

/// Factory of [`RedisStore`]s sharing one connection pool.
pub struct RedisStoreFactory {
    pool: Arc<Pool>,
    key_prefix: String,
    expiry_seconds: Option<u64>,
    stores: RwLock<HashMap<String, Arc<RedisStore>>>,
}

impl RedisStoreFactory {
    /// Connect and verify the backend with a `PING`.
    pub fn connect(config: &RedisConfig, expiry_seconds: Option<u64>) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url: {e}")))?;

        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size.max(1) as u32)
            .connection_timeout(Duration::from_secs(5))
            .build(RedisConnectionManager { client })
            .map_err(|e| StoreError::Unavailable(format!("failed to create redis pool: {e}")))?;

        {
            let mut conn = pool
                .get()
                .map_err(|e| StoreError::Unavailable(format!("failed to get connection: {e}")))?;
            let _: String = redis::cmd("PING")
                .query(&mut *conn)
                .map_err(|e| StoreError::Unavailable(format!("redis PING failed: {e}")))?;
        }

        tracing::info!(
            "Connected to Redis with prefix={}, expiry={:?}s, pool_size={}",
            config.key_prefix,
            expiry_seconds,
            config.pool_size
        );

        Ok(Self {
            pool: Arc::new(pool),
            key_prefix: config.key_prefix.clone(),
            expiry_seconds,
            stores: RwLock::new(HashMap::new()),
        })
    }
}

impl StoreFactory for RedisStoreFactory {
    fn get_store_by_name(&self, name: &str) -> Result<Arc<dyn Store>, StoreError> {
        if let Some(store) = self.stores.read().get(name) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write();
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(RedisStore {
                    name: name.to_string(),
                    hash_key: hash_key(&self.key_prefix, name),
                    pool: self.pool.clone(),
                    expiry_seconds: self.expiry_seconds,
                })
            })
            .clone();
        Ok(store)
    }

    fn has_store_with_name(&self, name: &str) -> bool {
        if self.stores.read().contains_key(name) {
            return true;
        }
        let exists = self.pool.get().map_err(|e| e.to_string()).and_then(|mut conn| {
            conn.exists::<_, bool>(hash_key(&self.key_prefix, name))
                .map_err(|e| e.to_string())
        });
        match exists {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!("Redis EXISTS failed for store {}: {}", name, e);
                false
            }
        }
    }

    fn delete_store_by_name(&self, name: &str) -> Result<(), StoreError> {
        self.stores.write().remove(name);
        let mut conn = self.pool.get().map_err(|e| StoreError::Operation {
            store: name.to_string(),
            operation: "delete_store",
            message: e.to_string(),
        })?;
        let _: () = conn
            .del(hash_key(&self.key_prefix, name))
            .map_err(|e| StoreError::Operation {
                store: name.to_string(),
                operation: "delete_store",
                message: e.to_string(),
            })?;
        Ok(())
    }

    fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn type_description(&self) -> &'static str {
        "redis"
    }
}
