//! Evicts a repository's cached reads after its mutations complete.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error};

use crate::events::{EventBus, LifecycleEvent, Listener, RepositoryAction, RepositoryId};

use super::config::CacheConfig;
use super::registry::CacheKeyRegistry;
use super::store::CacheStore;

/// Lifecycle listener that forgets every key registered for the emitting
/// repository. Store failures are logged and never reach the mutation.
pub struct CacheInvalidator {
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheKeyRegistry>,
    config: CacheConfig,
}

impl CacheInvalidator {
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

    /// Subscribe to `created`, `updated` and `deleted` on `bus`.
    pub fn attach(self: Arc<Self>, bus: &EventBus) {
        bus.subscribe(RepositoryAction::COMPLETED, self);
    }

    /// Forget every key issued for `repository`; returns how many were evicted.
    pub fn invalidate(&self, repository: &RepositoryId) -> usize {
        let keys = self.registry.keys_for(repository);
        let mut evicted = 0;

        for key in keys {
            match self.store.forget(&key) {
                Ok(_) => {
                    self.registry.unregister(repository, &key);
                    evicted += 1;
                }
                Err(err) => {
                    counter!("quarry_cache_invalidation_failure_total").increment(1);
                    error!(
                        repository = %repository,
                        store = self.store.name(),
                        key = %key,
                        error = %err,
                        "Failed to evict cached read"
                    );
                }
            }
        }

        debug!(repository = %repository, evicted, "Cache invalidated");
        evicted
    }
}

impl Listener for CacheInvalidator {
    fn handle(&self, event: &LifecycleEvent) {
        let action = event.action();
        if !self.config.cleans_on(action) {
            debug!(
                repository = %event.repository(),
                action = action.as_str(),
                "Cache cleaning disabled for action"
            );
            return;
        }
        self.invalidate(event.repository());
    }
}
