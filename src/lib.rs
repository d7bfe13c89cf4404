//! Repository sessions over a persistence engine.
//!
//! A [`Repository`] accumulates [`criteria`](crate::criteria), an optional
//! [`ScopeHook`] and chained query modifiers, folds them into a [`Query`] at
//! each terminal call and hands it to an [`Engine`]. Mutations publish
//! [`LifecycleEvent`]s on an [`EventBus`], which the [`CacheInvalidator`] uses
//! to forget cached reads.

pub mod cache;
pub mod config;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod events;
mod lock;
pub mod model;
pub mod pagination;
pub mod query;
pub mod repository;
pub mod request;
pub mod scope;
pub mod telemetry;

pub use cache::{CacheBinding, CacheInvalidator};
pub use criteria::{CriteriaSet, Criterion, CriterionRegistry};
pub use engine::{Engine, MemoryEngine, PostgresEngine, RawOperation, SyncChanges};
pub use error::{EngineError, RepositoryError};
pub use events::{EventBus, LifecycleEvent, RepositoryAction, RepositoryId, Subject};
pub use model::{Entity, Model, Record, Relation, Schema};
pub use pagination::Page;
pub use query::{Direction, Operator, Query, WhereConditions};
pub use repository::{Repository, RepositoryFactory};
pub use request::RequestContext;
pub use scope::ScopeHook;
