//! Repository sessions.
//!
//! A [`Repository`] owns one query value plus the criteria and scope that are
//! folded into it when a terminal read runs. Chain modifiers replace the query
//! value; terminal calls take it and leave a fresh one behind, whether or not
//! the engine call succeeds.

mod factory;
mod read;
mod write;

pub use factory::RepositoryFactory;

use std::fmt;
use std::mem;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::cache::CacheBinding;
use crate::config::Settings;
use crate::criteria::{CriteriaSet, Criterion, CriterionRegistry};
use crate::engine::Engine;
use crate::error::RepositoryError;
use crate::events::{EventBus, LifecycleEvent, RepositoryAction, RepositoryId, Subject};
use crate::model::{Entity, Model, Record, Schema};
use crate::query::{Direction, Query};
use crate::request::RequestContext;
use crate::scope::ScopeHook;

/// A query session over one table, hydrating rows into `M`.
pub struct Repository<M: Entity> {
    engine: Arc<dyn Engine>,
    settings: Arc<Settings>,
    schema: Schema,
    id: RepositoryId,
    query: Query,
    criteria: CriteriaSet<M>,
    registry: Arc<CriterionRegistry<M>>,
    scope: ScopeHook,
    skip_criteria: bool,
    skip_cache: bool,
    request: RequestContext,
    events: Option<Arc<EventBus>>,
    cache: Option<CacheBinding>,
}

impl<M: Model> Repository<M> {
    pub fn new(engine: Arc<dyn Engine>, settings: Arc<Settings>) -> Result<Self, RepositoryError> {
        Self::with_schema(engine, settings, M::schema())
    }
}

impl<M: Entity> Repository<M> {
    /// Session over an explicit schema; the repository id defaults to the table.
    pub fn with_schema(
        engine: Arc<dyn Engine>,
        settings: Arc<Settings>,
        schema: Schema,
    ) -> Result<Self, RepositoryError> {
        schema.validate()?;
        Ok(Self {
            engine,
            settings,
            id: RepositoryId::new(&schema.table),
            schema,
            query: Query::new(),
            criteria: CriteriaSet::new(),
            registry: Arc::new(CriterionRegistry::new()),
            scope: ScopeHook::new(),
            skip_criteria: false,
            skip_cache: false,
            request: RequestContext::default(),
            events: None,
            cache: None,
        })
    }

    /// Override the identity events and cache keys are filed under.
    pub fn with_id(mut self, id: impl AsRef<str>) -> Self {
        self.id = RepositoryId::new(id);
        self
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cache(mut self, cache: CacheBinding) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_criteria_registry(mut self, registry: Arc<CriterionRegistry<M>>) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// The query value chain modifiers have built so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn criteria(&self) -> &CriteriaSet<M> {
        &self.criteria
    }

    pub fn push_criteria<C: Criterion<M>>(&mut self, criterion: C) -> &mut Self {
        self.criteria.push(criterion);
        self
    }

    /// Push a criterion registered under `name`.
    pub fn push_criteria_named(&mut self, name: &str) -> Result<&mut Self, RepositoryError> {
        self.criteria.push_named(name, &self.registry)?;
        Ok(self)
    }

    /// Remove every pushed criterion of the same type as `criterion`.
    pub fn pop_criteria<C: Criterion<M>>(&mut self, criterion: &C) -> &mut Self {
        self.criteria.pop(criterion);
        self
    }

    pub fn pop_criteria_named(&mut self, name: &str) -> &mut Self {
        self.criteria.pop_named(name, &self.registry);
        self
    }

    pub fn reset_criteria(&mut self) -> &mut Self {
        self.criteria.reset();
        self
    }

    /// Ignore pushed criteria on subsequent reads; the scope still applies.
    pub fn skip_criteria(&mut self, skip: bool) -> &mut Self {
        self.skip_criteria = skip;
        self
    }

    pub fn skip_cache(&mut self, skip: bool) -> &mut Self {
        self.skip_cache = skip;
        self
    }

    pub fn scope_query<F>(&mut self, scope: F) -> &mut Self
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.scope.set(scope);
        self
    }

    pub fn reset_scope(&mut self) -> &mut Self {
        self.scope.clear();
        self
    }

    pub fn with<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modify(|query| query.with(relations))
    }

    pub fn with_count<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modify(|query| query.with_count(relations))
    }

    pub fn has(&mut self, relation: impl Into<String>) -> &mut Self {
        self.modify(|query| query.has(relation))
    }

    pub fn where_has<F>(&mut self, relation: impl Into<String>, constrain: F) -> &mut Self
    where
        F: FnOnce(Query) -> Query,
    {
        self.modify(|query| query.where_has(relation, constrain))
    }

    pub fn order_by(&mut self, column: impl Into<String>, direction: Direction) -> &mut Self {
        self.modify(|query| query.order_by(column, direction))
    }

    pub fn take(&mut self, limit: u64) -> &mut Self {
        self.modify(|query| query.limit(limit))
    }

    pub fn hidden<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modify(|query| query.hidden(fields))
    }

    pub fn visible<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modify(|query| query.visible(fields))
    }

    fn modify(&mut self, transform: impl FnOnce(Query) -> Query) -> &mut Self {
        self.query = transform(mem::take(&mut self.query));
        self
    }

    /// Take the query value and fold criteria (unless skipped) and the scope
    /// into it.
    fn prepared_query(&mut self) -> Query {
        let mut query = mem::take(&mut self.query);
        if !self.skip_criteria {
            for entry in self.criteria.all() {
                query = entry.criterion().apply(query, self);
            }
        }
        debug!(
            repository = %self.id,
            criteria = if self.skip_criteria { 0 } else { self.criteria.len() },
            scoped = self.scope.is_set(),
            "Query prepared"
        );
        self.scope.apply(query)
    }

    /// Take the query value and apply only the scope.
    fn scoped_query(&mut self) -> Query {
        let query = mem::take(&mut self.query);
        self.scope.apply(query)
    }

    fn check_relations(&self, query: &Query) -> Result<(), RepositoryError> {
        for name in query.relations() {
            if self.schema.find_relation(name).is_none() {
                return Err(RepositoryError::configuration(format!(
                    "relation `{name}` is not defined on `{}`",
                    self.schema.table
                )));
            }
        }
        Ok(())
    }

    fn publish(&self, action: RepositoryAction, subject: Subject) {
        if let Some(events) = &self.events {
            events.publish(&LifecycleEvent::new(action, self.id.clone(), subject));
        }
    }

    fn primary_key_of(&self, record: &Record) -> Result<Value, RepositoryError> {
        match record.get(&self.schema.primary_key) {
            Some(key) if !key.is_null() => Ok(key.clone()),
            _ => Err(RepositoryError::validation(format!(
                "`{}` row has no `{}` value",
                self.schema.table, self.schema.primary_key
            ))),
        }
    }

    fn by_key(&self, key: Value) -> Query {
        Query::new().where_eq(self.schema.primary_key.clone(), key)
    }
}

/// Apply `visible` then `hidden` to engine rows.
fn shape(rows: Vec<Record>, query: &Query) -> Vec<Record> {
    if query.visible.is_empty() && query.hidden.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|mut row| {
            if !query.visible.is_empty() {
                row.retain(|column, _| query.visible.iter().any(|visible| visible == column));
            }
            for hidden in &query.hidden {
                row.remove(hidden);
            }
            row
        })
        .collect()
}

fn hydrate<M: Entity>(record: Record) -> Result<M, RepositoryError> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

fn hydrate_all<M: Entity>(records: Vec<Record>) -> Result<Vec<M>, RepositoryError> {
    records.into_iter().map(hydrate).collect()
}

impl<M: Entity> fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("engine", &self.engine.name())
            .field("query", &self.query)
            .field("criteria", &self.criteria)
            .field("scope", &self.scope)
            .field("skip_criteria", &self.skip_criteria)
            .field("skip_cache", &self.skip_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests;
