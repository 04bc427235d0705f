use super::{Store, StoreFactory};
use crate::error::StoreError;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Entry = (Value, Option<Instant>);

/// In-memory store with optional per-item expiry.
///
/// Useful for tests, development, single-instance deployments and every
/// request-scoped store.
pub struct InMemoryStore {
    name: String,
    data: Mutex<HashMap<String, Entry>>,
    expiry: Option<Duration>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>, expiry: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            data: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    fn is_expired(expires_at: &Option<Instant>) -> bool {
        expires_at.is_some_and(|at| Instant::now() > at)
    }
}

impl Store for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn save(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let expires_at = self.expiry.map(|ttl| Instant::now() + ttl);
        self.data
            .lock()
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut data = self.data.lock();
        match data.get(key) {
            Some((value, expires_at)) if !Self::is_expired(expires_at) => Ok(Some(value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn load_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        let mut data = self.data.lock();
        data.retain(|_, (_, expires_at)| !Self::is_expired(expires_at));
        Ok(data
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect())
    }

    fn has_item_with_key(&self, key: &str) -> Result<bool, StoreError> {
        let data = self.data.lock();
        Ok(matches!(data.get(key), Some((_, expires_at)) if !Self::is_expired(expires_at)))
    }

    fn count(&self) -> Result<usize, StoreError> {
        let data = self.data.lock();
        Ok(data
            .values()
            .filter(|(_, expires_at)| !Self::is_expired(expires_at))
            .count())
    }

    fn type_description(&self) -> String {
        format!("inmemory({})", self.name)
    }
}

/// Factory of [`InMemoryStore`]s, one per name for the factory's lifetime.
#[derive(Default)]
pub struct InMemoryStoreFactory {
    stores: RwLock<HashMap<String, Arc<InMemoryStore>>>,
    expiry: Option<Duration>,
}

impl InMemoryStoreFactory {
    pub fn new(expiry: Option<Duration>) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            expiry,
        }
    }
}

impl StoreFactory for InMemoryStoreFactory {
    fn get_store_by_name(&self, name: &str) -> Result<Arc<dyn Store>, StoreError> {
        if let Some(store) = self.stores.read().get(name) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write();
        let store = stores
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating in-memory store: {}", name);
                Arc::new(InMemoryStore::new(name, self.expiry))
            })
            .clone();
        Ok(store)
    }

    fn has_store_with_name(&self, name: &str) -> bool {
        self.stores.read().contains_key(name)
    }

    fn delete_store_by_name(&self, name: &str) -> Result<(), StoreError> {
        if self.stores.write().remove(name).is_some() {
            tracing::trace!("Deleted in-memory store: {}", name);
        }
        Ok(())
    }

    fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn type_description(&self) -> &'static str {
        "inmemory"
    }
}
