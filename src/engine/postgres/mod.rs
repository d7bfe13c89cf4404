//! sqlx-backed engine.

mod sql;
mod util;

pub use util::map_sqlx_error;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::debug;

use crate::config::DatabaseSettings;
use crate::error::EngineError;
use crate::model::{Record, Relation, Schema};
use crate::query::Query;

use super::{Engine, RawOperation, SyncChanges};

#[derive(Clone)]
pub struct PostgresEngine {
    pool: PgPool,
}

impl PostgresEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, EngineError> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| EngineError::validation("database.url is not configured"))?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), EngineError> {
        sqlx::query("SELECT 1")
            .execute(self.pool())
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Engine for PostgresEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn select(&self, schema: &Schema, query: &Query) -> Result<Vec<Record>, EngineError> {
        let mut statement = sql::select(schema, query)?;
        debug!(table = %schema.table, sql = statement.sql(), "Postgres select");
        let rows = statement
            .build_query_scalar::<Json<Record>>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn count(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError> {
        let mut statement = sql::count(schema, query)?;
        let count = statement
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn insert(&self, schema: &Schema, attributes: Record) -> Result<Record, EngineError> {
        let mut statement = sql::insert(schema, attributes);
        let Json(row) = statement
            .build_query_scalar::<Json<Record>>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(row)
    }

    async fn update(
        &self,
        schema: &Schema,
        query: &Query,
        attributes: Record,
    ) -> Result<Vec<Record>, EngineError> {
        if attributes.is_empty() {
            return self.select(schema, query).await;
        }
        let mut statement = sql::update(schema, query, attributes)?;
        let rows = statement
            .build_query_scalar::<Json<Record>>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn delete(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError> {
        let mut statement = sql::delete(schema, query)?;
        let result = statement
            .build()
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn sync_relation(
        &self,
        schema: &Schema,
        relation: &Relation,
        parent: &Value,
        ids: &[Value],
        detaching: bool,
    ) -> Result<SyncChanges, EngineError> {
        let pivot = sql::Pivot::of(relation)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let current: Vec<Value> = pivot
            .related_ids(parent)
            .build_query_scalar::<Json<Value>>()
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(|Json(id)| id)
            .collect();

        let mut changes = SyncChanges::default();
        if detaching {
            changes.detached = current
                .iter()
                .filter(|id| !ids.contains(id))
                .cloned()
                .collect();
            if !changes.detached.is_empty() {
                pivot
                    .detach(parent, &changes.detached)
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }
        }

        for id in ids {
            if current.contains(id) || changes.attached.contains(id) {
                continue;
            }
            pivot
                .attach(parent, id)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            changes.attached.push(id.clone());
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(
            table = %schema.table,
            relation = %relation.name,
            attached = changes.attached.len(),
            detached = changes.detached.len(),
            "Pivot synced"
        );
        Ok(changes)
    }

    async fn raw(
        &self,
        schema: &Schema,
        query: &Query,
        operation: &RawOperation,
    ) -> Result<Value, EngineError> {
        let mut statement = sql::aggregate(schema, query, operation)?;
        let value = statement
            .build_query_scalar::<Option<Json<Value>>>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(value.map_or(Value::Null, |Json(value)| value))
    }
}
