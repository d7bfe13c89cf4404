//! Cache storage implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::error::{CacheError, RepositoryError};
use crate::lock::{rw_read, rw_write};

use super::config::CacheConfig;

const SOURCE: &str = "cache::store";

/// Name under which the in-memory store is registered.
pub const MEMORY_STORE: &str = "memory";

/// Key/value storage for cached reads.
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`; returns whether an entry was present.
    fn forget(&self, key: &str) -> Result<bool, CacheError>;

    /// Whether `key` may still be stored. Stores that cannot tell answer
    /// `true`, which keeps the key registered until an invalidation.
    fn holds(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(true)
    }
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process store with LRU eviction and per-entry expiry.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        rw_read(&self.entries, SOURCE, "contains")
            .peek(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str {
        MEMORY_STORE
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let value = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                debug!(key, "Cached read expired");
                None
            }
            None => None,
        };
        Ok(value)
    }

    fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return Ok(());
        };
        let evicted = rw_write(&self.entries, SOURCE, "put")
            .push(key.to_string(), Entry { value, expires_at });
        match evicted {
            Some((evicted_key, _)) if evicted_key != key => {
                counter!("quarry_cache_evict_total").increment(1);
                debug!(key = %evicted_key, "Cached read evicted for capacity");
            }
            _ => {}
        }
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool, CacheError> {
        Ok(rw_write(&self.entries, SOURCE, "forget").pop(key).is_some())
    }

    fn holds(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.contains(key))
    }
}

impl fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("len", &self.len())
            .finish()
    }
}

/// Named cache stores; `cache.repository` picks one of them.
#[derive(Clone, Default)]
pub struct CacheStores {
    stores: HashMap<String, Arc<dyn CacheStore>>,
}

impl CacheStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stores available without extra wiring: just the in-memory one.
    pub fn with_defaults(config: &CacheConfig) -> Self {
        Self::new().with(Arc::new(MemoryCacheStore::new(config)))
    }

    pub fn with(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.stores.insert(store.name().to_string(), store);
        self
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CacheStore>, RepositoryError> {
        self.stores.get(name).cloned().ok_or_else(|| {
            RepositoryError::configuration(format!("cache store `{name}` is not registered"))
        })
    }
}

impl fmt::Debug for CacheStores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.stores.keys().collect();
        names.sort();
        f.debug_struct("CacheStores").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use serde_json::json;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn roundtrip_and_forget() {
        let store = MemoryCacheStore::new(&CacheConfig::default());

        assert!(store.get("k").expect("get").is_none());
        store.put("k", json!({"id": 1}), MINUTE).expect("put");
        assert_eq!(store.get("k").expect("get"), Some(json!({"id": 1})));

        assert!(store.forget("k").expect("forget"));
        assert!(!store.forget("k").expect("forget"));
        assert!(store.get("k").expect("get").is_none());
    }

    #[test]
    fn expired_entries_are_misses() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        store.put("k", json!(1), Duration::ZERO).expect("put");

        assert!(!store.contains("k"));
        assert!(store.get("k").expect("get").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn lru_eviction() {
        let config = CacheConfig {
            capacity: NonZeroUsize::new(2).expect("non-zero"),
            ..Default::default()
        };
        let store = MemoryCacheStore::new(&config);

        store.put("a", json!(1), MINUTE).expect("put");
        store.put("b", json!(2), MINUTE).expect("put");
        assert!(store.get("a").expect("get").is_some());

        store.put("c", json!(3), MINUTE).expect("put");

        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(store.contains("c"));
        assert!(!store.holds("b").expect("holds"));
    }

    #[test]
    fn unknown_store_is_configuration_error() {
        let stores = CacheStores::with_defaults(&CacheConfig::default());
        assert!(stores.resolve(MEMORY_STORE).is_ok());

        let err = stores.resolve("redis").err().expect("unknown store");
        assert!(matches!(err, RepositoryError::Configuration { .. }));
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = MemoryCacheStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.entries.write().expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        store.put("k", json!(true), MINUTE).expect("put");
        assert_eq!(store.get("k").expect("get"), Some(json!(true)));
    }
}
