use std::fmt;
use std::sync::Arc;

use crate::cache::{CacheBinding, CacheKeyRegistry, CacheStores};
use crate::config::Settings;
use crate::engine::Engine;
use crate::error::RepositoryError;
use crate::events::EventBus;
use crate::model::{Entity, Model, Schema};
use crate::request::RequestContext;

use super::Repository;

/// Hands out sessions sharing one engine, settings, event bus and cache.
#[derive(Clone)]
pub struct RepositoryFactory {
    engine: Arc<dyn Engine>,
    settings: Arc<Settings>,
    events: Arc<EventBus>,
    cache: Option<CacheBinding>,
    request: RequestContext,
}

impl RepositoryFactory {
    pub fn new(engine: Arc<dyn Engine>, settings: Arc<Settings>) -> Self {
        Self {
            engine,
            settings,
            events: Arc::new(EventBus::new()),
            cache: None,
            request: RequestContext::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cache(mut self, cache: CacheBinding) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bind the store named by `cache.repository` and subscribe a
    /// [`crate::cache::CacheInvalidator`] for it on this factory's bus.
    pub fn with_configured_cache(self, stores: &CacheStores) -> Result<Self, RepositoryError> {
        let binding = CacheBinding::from_settings(
            &self.settings.cache,
            stores,
            Arc::new(CacheKeyRegistry::new()),
        )?;
        binding.attach_invalidator(&self.events);
        Ok(self.with_cache(binding))
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cache(&self) -> Option<&CacheBinding> {
        self.cache.as_ref()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn repository<M: Model>(&self) -> Result<Repository<M>, RepositoryError> {
        self.repository_for(M::schema())
    }

    /// A session over `schema`, for entities without a static schema.
    pub fn repository_for<M: Entity>(
        &self,
        schema: Schema,
    ) -> Result<Repository<M>, RepositoryError> {
        let repository = Repository::with_schema(
            Arc::clone(&self.engine),
            Arc::clone(&self.settings),
            schema,
        )?
        .with_events(Arc::clone(&self.events))
        .with_request(self.request.clone());

        Ok(match &self.cache {
            Some(cache) => repository.with_cache(cache.clone()),
            None => repository,
        })
    }
}

impl fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("engine", &self.engine.name())
            .field("events", &self.events)
            .field("cache", &self.cache)
            .finish()
    }
}
