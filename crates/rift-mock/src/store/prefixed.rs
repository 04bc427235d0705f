use super::Store;
use crate::error::StoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Namespaces every key of an underlying store with a fixed prefix.
///
/// Callers never see the prefix: keys are prefixed on the way in and
/// stripped on the way out, and only prefixed keys are visible.
pub struct PrefixedKeyStore {
    inner: Arc<dyn Store>,
    prefix: String,
}

impl PrefixedKeyStore {
    pub fn new(inner: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl Store for PrefixedKeyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn save(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.inner.save(&self.prefixed(key), value)
    }

    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.load(&self.prefixed(key))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(&self.prefixed(key))
    }

    fn load_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        Ok(self
            .inner
            .load_all()?
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(self.prefix.as_str())
                    .map(|stripped| (stripped.to_string(), value))
            })
            .collect())
    }

    fn has_item_with_key(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.has_item_with_key(&self.prefixed(key))
    }

    fn count(&self) -> Result<usize, StoreError> {
        if self.prefix.is_empty() {
            return self.inner.count();
        }
        Ok(self
            .inner
            .load_all()?
            .keys()
            .filter(|key| key.starts_with(self.prefix.as_str()))
            .count())
    }

    fn type_description(&self) -> String {
        format!("prefixed({}, {})", self.prefix, self.inner.type_description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn stores() -> (Arc<dyn Store>, PrefixedKeyStore) {
        let inner: Arc<dyn Store> = Arc::new(InMemoryStore::new("shared", None));
        let prefixed = PrefixedKeyStore::new(inner.clone(), "tenant-a:");
        (inner, prefixed)
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let (inner, store) = stores();
        store.save("user", json!({"id": 7})).unwrap();

        assert_eq!(store.load("user").unwrap(), Some(json!({"id": 7})));
        assert_eq!(inner.load("tenant-a:user").unwrap(), Some(json!({"id": 7})));
        assert_eq!(inner.load("user").unwrap(), None);
    }

    #[test]
    fn test_load_all_strips_prefix_and_hides_foreign_keys() {
        let (inner, store) = stores();
        store.save("a", json!(1)).unwrap();
        store.save("b", json!(2)).unwrap();
        inner.save("tenant-b:a", json!(99)).unwrap();
        inner.save("plain", json!(0)).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.keys().all(|k| !k.starts_with("tenant-a:")));
        assert_eq!(all.get("a"), Some(&json!(1)));
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(inner.count().unwrap(), 4);
    }

    #[test]
    fn test_delete_and_has_item() {
        let (_inner, store) = stores();
        store.save("k", json!("v")).unwrap();
        assert!(store.has_item_with_key("k").unwrap());
        store.delete("k").unwrap();
        assert!(!store.has_item_with_key("k").unwrap());
    }

    #[test]
    fn test_type_description_wraps_inner() {
        let (_inner, store) = stores();
        assert_eq!(store.name(), "shared");
        assert_eq!(
            store.type_description(),
            "prefixed(tenant-a:, inmemory(shared))"
        );
    }
}
