//! Read caching for repository sessions.
//!
//! Cacheable reads store their results under `"{repository}@{method}-{digest}"`
//! and register the key with a [`CacheKeyRegistry`]. A [`CacheInvalidator`]
//! subscribed to the lifecycle bus forgets those keys once a mutation on the
//! same repository completes.
//!
//! ```toml
//! [cache]
//! enabled = true
//! minutes = 30
//! repository = "memory"
//!
//! [cache.clean.on]
//! created = true
//! ```

mod config;
mod invalidator;
mod keys;
mod registry;
mod store;

pub use config::CacheConfig;
pub use invalidator::CacheInvalidator;
pub use keys::read_key;
pub use registry::CacheKeyRegistry;
pub use store::{CacheStore, CacheStores, MEMORY_STORE, MemoryCacheStore};

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::error::RepositoryError;
use crate::events::{EventBus, RepositoryId};

/// The store, key registry and settings a repository caches its reads with.
#[derive(Clone)]
pub struct CacheBinding {
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheKeyRegistry>,
    config: CacheConfig,
}

impl CacheBinding {
    pub fn new(
        store: Arc<dyn CacheStore>,
        registry: Arc<CacheKeyRegistry>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Resolve the store named by `cache.repository`.
    pub fn from_settings(
        settings: &CacheSettings,
        stores: &CacheStores,
        registry: Arc<CacheKeyRegistry>,
    ) -> Result<Self, RepositoryError> {
        let store = stores.resolve(&settings.repository)?;
        Ok(Self::new(store, registry, CacheConfig::from(settings)))
    }

    /// Build the invalidator for this binding and subscribe it to `bus`.
    pub fn attach_invalidator(&self, bus: &EventBus) -> Arc<CacheInvalidator> {
        let invalidator = Arc::new(CacheInvalidator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.clone(),
        ));
        Arc::clone(&invalidator).attach(bus);
        invalidator
    }

    /// Register a freshly stored `key` and drop the repository's keys the
    /// store has since evicted or expired.
    pub fn remember(&self, repository: &RepositoryId, key: String) {
        self.registry.register(repository, key);
        let pruned = self.registry.retain(repository, |key| {
            self.store.holds(key).unwrap_or_else(|err| {
                warn!(
                    repository = %repository,
                    store = self.store.name(),
                    key,
                    error = %err,
                    "Cache presence check failed"
                );
                true
            })
        });
        if pruned > 0 {
            debug!(repository = %repository, pruned, "Pruned evicted cache keys");
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CacheKeyRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl fmt::Debug for CacheBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBinding")
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}
