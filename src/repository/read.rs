//! Terminal reads and cached-read bookkeeping.

use std::any::type_name;
use std::future::Future;
use std::mem;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheBinding, read_key};
use crate::criteria::Criterion;
use crate::engine::RawOperation;
use crate::error::RepositoryError;
use crate::model::{Entity, Record, display_key, to_key, to_record};
use crate::pagination::Page;
use crate::query::{Query, WhereConditions};

use super::{Repository, hydrate, hydrate_all, shape};

/// Reads whose results may be served from a bound cache.
const CACHEABLE: [&str; 6] = [
    "all",
    "paginate",
    "find",
    "find_by_field",
    "find_where",
    "get_by_criteria",
];

impl<M: Entity> Repository<M> {
    /// Every row the criteria and scope let through. Clears the scope.
    pub async fn all(&mut self) -> Result<Vec<M>, RepositoryError> {
        let query = self.prepared_query();
        let result = self.read("all", &(), &query).await;
        self.scope.clear();
        hydrate_all(result?)
    }

    /// Like [`Repository::all`], selecting `columns` (`*` or empty for all).
    pub async fn get(&mut self, columns: &[&str]) -> Result<Vec<M>, RepositoryError> {
        let query = self.prepared_query().select(columns);
        let result = self.read("get", columns, &query).await;
        self.scope.clear();
        hydrate_all(result?)
    }

    pub async fn first(&mut self) -> Result<Option<M>, RepositoryError> {
        let query = self.prepared_query().limit(1);
        let rows = self.read("first", &(), &query).await?;
        rows.into_iter().next().map(hydrate).transpose()
    }

    /// The row with primary key `id`; a miss is [`RepositoryError::NotFound`].
    pub async fn find<K>(&mut self, id: &K) -> Result<M, RepositoryError>
    where
        K: Serialize + ?Sized,
    {
        let query = self.prepared_query();
        let key = to_key(id)?;
        hydrate(self.find_record("find", query, key).await?)
    }

    pub async fn find_by_field(
        &mut self,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<M>, RepositoryError> {
        let value = value.into();
        let query = self.prepared_query().where_eq(field, value.clone());
        let rows = self.read("find_by_field", &(field, &value), &query).await?;
        hydrate_all(rows)
    }

    pub async fn find_where(
        &mut self,
        conditions: WhereConditions,
        columns: &[&str],
    ) -> Result<Vec<M>, RepositoryError> {
        let query = self
            .prepared_query()
            .where_conditions(conditions)
            .select(columns);
        let rows = self.read("find_where", columns, &query).await?;
        hydrate_all(rows)
    }

    pub async fn find_where_in<I, V>(&mut self, field: &str, values: I) -> Result<Vec<M>, RepositoryError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let query = self.prepared_query().where_in(field, values);
        let rows = self.read("find_where_in", field, &query).await?;
        hydrate_all(rows)
    }

    pub async fn find_where_not_in<I, V>(
        &mut self,
        field: &str,
        values: I,
    ) -> Result<Vec<M>, RepositoryError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let query = self.prepared_query().where_not_in(field, values);
        let rows = self.read("find_where_not_in", field, &query).await?;
        hydrate_all(rows)
    }

    pub async fn find_where_between(
        &mut self,
        field: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Vec<M>, RepositoryError> {
        let query = self.prepared_query().where_between(field, low, high);
        let rows = self.read("find_where_between", field, &query).await?;
        hydrate_all(rows)
    }

    /// Rows matching `conditions` on top of criteria and scope. Clears the scope.
    pub async fn count(&mut self, conditions: WhereConditions) -> Result<u64, RepositoryError> {
        self.count_column(conditions, "*").await
    }

    /// Like [`Repository::count`], only counting non-null `column` values.
    pub async fn count_column(
        &mut self,
        conditions: WhereConditions,
        column: &str,
    ) -> Result<u64, RepositoryError> {
        let mut query = self.prepared_query().where_conditions(conditions);
        if column != "*" {
            query = query.where_not_null(column);
        }
        let result = self.count_rows(&query).await;
        self.scope.clear();
        result
    }

    /// At most `limit` rows. Clears the scope.
    pub async fn limit(&mut self, limit: u64) -> Result<Vec<M>, RepositoryError> {
        let query = self.prepared_query().limit(limit);
        let result = self.read("limit", &limit, &query).await;
        self.scope.clear();
        hydrate_all(result?)
    }

    /// The request's current page with a total count. `limit` falls back to
    /// `pagination.limit`.
    pub async fn paginate(
        &mut self,
        limit: Option<u64>,
        columns: &[&str],
    ) -> Result<Page<M>, RepositoryError> {
        let per_page = self.per_page(limit);
        let current = self.request.page();
        let query = self.prepared_query().select(columns);
        self.check_relations(&query)?;

        let load = self.load_page(&query, per_page, current);
        let page = self
            .remember("paginate", &(per_page, &self.request), &query, load)
            .await?;
        page.try_map(hydrate)
    }

    /// The request's current page without counting the total.
    pub async fn simple_paginate(
        &mut self,
        limit: Option<u64>,
        columns: &[&str],
    ) -> Result<Page<M>, RepositoryError> {
        let per_page = self.per_page(limit);
        let current = self.request.page();
        let query = self.prepared_query().select(columns);
        self.check_relations(&query)?;

        let window = query
            .clone()
            .offset(offset_of(current, per_page))
            .limit(per_page.saturating_add(1));
        let mut rows = shape(self.engine.select(&self.schema, &window).await?, &query);
        let has_more = rows.len() as u64 > per_page;
        rows.truncate(usize::try_from(per_page).unwrap_or(usize::MAX));

        Page::simple(rows, per_page, current, has_more, &self.request).try_map(hydrate)
    }

    /// Values of `column`, in row order.
    pub async fn pluck(&mut self, column: &str) -> Result<Vec<Value>, RepositoryError> {
        let query = self.prepared_query().select([column]);
        let rows = self.read("pluck", column, &query).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(column).unwrap_or(Value::Null))
            .collect())
    }

    /// `(key, column)` pairs, in row order.
    pub async fn lists(
        &mut self,
        column: &str,
        key: &str,
    ) -> Result<Vec<(Value, Value)>, RepositoryError> {
        let query = self.prepared_query().select([key, column]);
        let rows = self.read("lists", &(column, key), &query).await?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                let value = row.remove(column).unwrap_or(Value::Null);
                let key = row.remove(key).unwrap_or(Value::Null);
                (key, value)
            })
            .collect())
    }

    /// The first row matching `attributes`, or an unsaved entity built from them.
    pub async fn first_or_new<A>(&mut self, attributes: &A) -> Result<M, RepositoryError>
    where
        A: Serialize + ?Sized,
    {
        let query = self.prepared_query();
        let attributes = to_record(attributes)?;
        match self.first_matching("first_or_new", query, &attributes).await? {
            Some(row) => hydrate(row),
            None => hydrate(attributes),
        }
    }

    /// The first row matching `attributes`, creating it when none exists.
    pub async fn first_or_create<A>(&mut self, attributes: &A) -> Result<M, RepositoryError>
    where
        A: Serialize + ?Sized,
    {
        let query = self.prepared_query();
        let attributes = to_record(attributes)?;
        match self.first_matching("first_or_create", query, &attributes).await? {
            Some(row) => hydrate(row),
            None => hydrate(self.insert_with_events(attributes).await?),
        }
    }

    /// Rows after applying `criterion` alone; pushed criteria and scope are
    /// left out.
    pub async fn get_by_criteria<C: Criterion<M>>(
        &mut self,
        criterion: &C,
    ) -> Result<Vec<M>, RepositoryError> {
        let query = mem::take(&mut self.query);
        let query = criterion.apply(query, self);
        let rows = self
            .read("get_by_criteria", type_name::<C>(), &query)
            .await?;
        hydrate_all(rows)
    }

    /// Forward `operation` to the engine over the prepared query. Engine
    /// failures surface as [`RepositoryError::Passthrough`].
    pub async fn raw(&mut self, operation: RawOperation) -> Result<Value, RepositoryError> {
        let query = self.prepared_query();
        self.check_relations(&query)?;
        debug!(repository = %self.id, operation = operation.name(), "Raw passthrough");
        self.engine
            .raw(&self.schema, &query, &operation)
            .await
            .map_err(RepositoryError::Passthrough)
    }

    pub(super) async fn find_record(
        &self,
        method: &'static str,
        query: Query,
        key: Value,
    ) -> Result<Record, RepositoryError> {
        let query = query
            .where_eq(self.schema.primary_key.clone(), key.clone())
            .limit(1);
        let rows = self.read(method, &key, &query).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found(self.schema.table.clone(), display_key(&key)))
    }

    pub(super) async fn first_matching(
        &self,
        method: &'static str,
        query: Query,
        attributes: &Record,
    ) -> Result<Option<Record>, RepositoryError> {
        let query = attributes
            .iter()
            .fold(query, |query, (column, value)| {
                query.where_eq(column.clone(), value.clone())
            })
            .limit(1);
        let rows = self.read(method, attributes, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn read<A>(
        &self,
        method: &'static str,
        args: &A,
        query: &Query,
    ) -> Result<Vec<Record>, RepositoryError>
    where
        A: Serialize + ?Sized,
    {
        self.check_relations(query)?;
        let load = async {
            let rows = self.engine.select(&self.schema, query).await?;
            Ok::<_, RepositoryError>(shape(rows, query))
        };
        self.remember(method, args, query, load).await
    }

    async fn count_rows(&self, query: &Query) -> Result<u64, RepositoryError> {
        self.check_relations(query)?;
        Ok(self.engine.count(&self.schema, query).await?)
    }

    async fn load_page(
        &self,
        query: &Query,
        per_page: u64,
        current: u64,
    ) -> Result<Page<Record>, RepositoryError> {
        let total = self.engine.count(&self.schema, query).await?;
        let window = query
            .clone()
            .offset(offset_of(current, per_page))
            .limit(per_page);
        let rows = shape(self.engine.select(&self.schema, &window).await?, query);
        Ok(Page::length_aware(rows, total, per_page, current, &self.request))
    }

    fn per_page(&self, limit: Option<u64>) -> u64 {
        limit
            .filter(|limit| *limit > 0)
            .unwrap_or(self.settings.pagination.limit.get())
    }

    /// Serve `load` through the cache when this read may be cached.
    async fn remember<T, A, F>(
        &self,
        method: &'static str,
        args: &A,
        query: &Query,
        load: F,
    ) -> Result<T, RepositoryError>
    where
        T: Serialize + DeserializeOwned,
        A: Serialize + ?Sized,
        F: Future<Output = Result<T, RepositoryError>>,
    {
        let Some((cache, key)) = self.cache_key(method, args, query) else {
            return load.await;
        };

        if let Some(hit) = self.cached(cache, method, &key) {
            return Ok(hit);
        }

        counter!("quarry_cache_miss_total", "method" => method).increment(1);
        debug!(repository = %self.id, method, key = %key, "Cache miss");
        let fresh = load.await?;
        self.store(cache, key, &fresh);
        Ok(fresh)
    }

    fn cache_key<A>(
        &self,
        method: &'static str,
        args: &A,
        query: &Query,
    ) -> Option<(&CacheBinding, String)>
    where
        A: Serialize + ?Sized,
    {
        let cache = self.cache.as_ref()?;
        let config = cache.config();
        if !config.enabled
            || self.skip_cache
            || !CACHEABLE.contains(&method)
            || !config.allows(method)
            || self.request.flag(&config.skip_param)
        {
            return None;
        }

        match read_key(&self.id, method, args, query) {
            Ok(key) => Some((cache, key)),
            Err(err) => {
                warn!(repository = %self.id, method, error = %err, "Reading through cache");
                None
            }
        }
    }

    fn cached<T: DeserializeOwned>(
        &self,
        cache: &CacheBinding,
        method: &'static str,
        key: &str,
    ) -> Option<T> {
        match cache.store().get(key) {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(hit) => {
                    counter!("quarry_cache_hit_total", "method" => method).increment(1);
                    debug!(repository = %self.id, method, key, "Cache hit");
                    Some(hit)
                }
                Err(err) => {
                    warn!(repository = %self.id, key, error = %err, "Discarding undecodable cached read");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(
                    repository = %self.id,
                    store = cache.store().name(),
                    error = %err,
                    "Cache lookup failed"
                );
                None
            }
        }
    }

    fn store<T: Serialize>(&self, cache: &CacheBinding, key: String, value: &T) {
        let encoded = match serde_json::to_value(value) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(repository = %self.id, key = %key, error = %err, "Cannot encode read for caching");
                return;
            }
        };
        match cache.store().put(&key, encoded, cache.config().ttl) {
            Ok(()) => cache.remember(&self.id, key),
            Err(err) => warn!(
                repository = %self.id,
                store = cache.store().name(),
                error = %err,
                "Cache write failed"
            ),
        }
    }
}

fn offset_of(page: u64, per_page: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(per_page)
}
