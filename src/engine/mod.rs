//! Persistence boundary: the operations a repository session dispatches.

mod memory;
mod postgres;

pub use memory::MemoryEngine;
pub use postgres::PostgresEngine;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::EngineError;
use crate::model::{Record, Relation, Schema};
use crate::query::Query;

/// Aggregate and inspection operations forwarded verbatim by `Repository::raw`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "column", rename_all = "snake_case")]
pub enum RawOperation {
    Exists,
    Max(String),
    Min(String),
    Sum(String),
    Avg(String),
    Distinct(String),
}

impl RawOperation {
    pub fn name(&self) -> &'static str {
        match self {
            RawOperation::Exists => "exists",
            RawOperation::Max(_) => "max",
            RawOperation::Min(_) => "min",
            RawOperation::Sum(_) => "sum",
            RawOperation::Avg(_) => "avg",
            RawOperation::Distinct(_) => "distinct",
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            RawOperation::Exists => None,
            RawOperation::Max(column)
            | RawOperation::Min(column)
            | RawOperation::Sum(column)
            | RawOperation::Avg(column)
            | RawOperation::Distinct(column) => Some(column),
        }
    }
}

/// Pivot rows touched by a relation sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncChanges {
    pub attached: Vec<Value>,
    pub detached: Vec<Value>,
}

#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Rows matching `query`, with eager relations and counts attached.
    async fn select(&self, schema: &Schema, query: &Query) -> Result<Vec<Record>, EngineError>;

    /// Rows matching the conditions of `query`; ordering and limits are ignored.
    async fn count(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError>;

    /// Persist `attributes` and return the stored row, keys included.
    async fn insert(&self, schema: &Schema, attributes: Record) -> Result<Record, EngineError>;

    /// Apply `attributes` to every row matching `query`; returns the updated rows.
    async fn update(
        &self,
        schema: &Schema,
        query: &Query,
        attributes: Record,
    ) -> Result<Vec<Record>, EngineError>;

    /// Delete every row matching `query`; returns how many were removed.
    async fn delete(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError>;

    /// Make the pivot rows of `relation` for `parent` reference `ids`.
    ///
    /// Without `detaching`, existing pivot rows outside `ids` are kept.
    async fn sync_relation(
        &self,
        schema: &Schema,
        relation: &Relation,
        parent: &Value,
        ids: &[Value],
        detaching: bool,
    ) -> Result<SyncChanges, EngineError>;

    async fn raw(
        &self,
        schema: &Schema,
        query: &Query,
        operation: &RawOperation,
    ) -> Result<Value, EngineError>;
}
