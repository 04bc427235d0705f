//! Bounded in-process cache with LRU eviction and optional TTL.
//!
//! Used for compiled scripts. Lookups go through
//! [`BoundedCache::get_or_try_insert_with`], which guarantees a single
//! computation per cold key: concurrent callers for the same key wait on that
//! key's cell while callers for other keys proceed.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Configuration for a bounded cache
#[derive(Clone, Debug)]
pub struct BoundedCacheConfig {
    /// Maximum number of entries (LRU eviction when exceeded)
    pub capacity: usize,
    /// Entry lifetime (None = no expiration)
    pub ttl: Option<Duration>,
}

impl BoundedCacheConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }
}

/// Metrics for cache performance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    cell: Arc<OnceCell<V>>,
    inserted_at: Instant,
    last_used: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.inserted_at.elapsed() > ttl)
    }
}

/// Entries and metrics behind a single lock.
struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    tick: u64,
    metrics: CacheMetrics,
}

pub struct BoundedCache<K, V> {
    config: BoundedCacheConfig,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(config: BoundedCacheConfig) -> Self {
        debug!(
            "Creating bounded cache: capacity={}, ttl={:?}",
            config.capacity, config.ttl
        );
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                tick: 0,
                metrics: CacheMetrics::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Return the cached value for `key`, computing it with `compute` on a miss.
    ///
    /// A failed computation leaves nothing behind, so the next caller retries.
    pub fn get_or_try_insert_with<F, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let cell = {
            let mut state = self.state.lock();
            state.tick += 1;
            let tick = state.tick;
            self.expire_key(&mut state, &key);

            let existing = state.entries.get_mut(&key).map(|entry| {
                entry.last_used = tick;
                entry.cell.clone()
            });
            match existing {
                Some(cell) => {
                    if let Some(value) = cell.get() {
                        state.metrics.hits += 1;
                        trace!("Cache hit for key: {:?}", key);
                        return Ok(value.clone());
                    }
                    // Another caller is computing this key
                    state.metrics.misses += 1;
                    cell
                }
                None => {
                    trace!("Cache miss for key: {:?}", key);
                    state.metrics.misses += 1;
                    let cell = Arc::new(OnceCell::new());
                    state.entries.insert(
                        key.clone(),
                        CacheEntry {
                            cell: cell.clone(),
                            inserted_at: Instant::now(),
                            last_used: tick,
                        },
                    );
                    self.evict_lru(&mut state, &key);
                    state.metrics.size = state.entries.len();
                    cell
                }
            }
        };

        match cell.get_or_try_init(compute) {
            Ok(value) => Ok(value.clone()),
            Err(e) => {
                let mut state = self.state.lock();
                let failed = state
                    .entries
                    .get(&key)
                    .is_some_and(|entry| Arc::ptr_eq(&entry.cell, &cell) && entry.cell.get().is_none());
                if failed {
                    state.entries.remove(&key);
                    state.metrics.size = state.entries.len();
                }
                Err(e)
            }
        }
    }

    /// Return the cached value without computing anything.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        self.expire_key(&mut state, key);

        let found = state.entries.get_mut(key).and_then(|entry| {
            entry.last_used = tick;
            entry.cell.get().cloned()
        });
        match found {
            Some(_) => state.metrics.hits += 1,
            None => state.metrics.misses += 1,
        }
        found
    }

    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                cell: Arc::new(OnceCell::with_value(value)),
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
        self.evict_lru(&mut state, &key);
        state.metrics.size = state.entries.len();
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .is_some_and(|entry| entry.cell.get().is_some() && !entry.is_expired(self.config.ttl))
    }

    pub fn invalidate(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let removed = state.entries.remove(key).is_some();
        state.metrics.size = state.entries.len();
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.metrics.size = 0;
        debug!("Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.state.lock().metrics.clone()
    }

    fn expire_key(&self, state: &mut CacheState<K, V>, key: &K) {
        let expired = state
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(self.config.ttl));
        if expired {
            trace!("Cache entry expired for key: {:?}", key);
            state.entries.remove(key);
            state.metrics.expirations += 1;
            state.metrics.size = state.entries.len();
        }
    }

    /// Evict least recently used entries until within capacity, never
    /// evicting `keep` or an entry still being computed. The cache may sit
    /// above capacity until those computations finish.
    fn evict_lru(&self, state: &mut CacheState<K, V>, keep: &K) {
        while state.entries.len() > self.config.capacity {
            let victim = state
                .entries
                .iter()
                .filter(|(k, entry)| *k != keep && entry.cell.get().is_some())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    trace!("Evicted LRU entry: {:?}", key);
                    state.entries.remove(&key);
                    state.metrics.evictions += 1;
                }
                None => break,
            }
        }
    }
}
