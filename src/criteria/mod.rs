//! Reusable query filters accumulated by a repository session.

mod builtin;
mod registry;
mod set;

pub use builtin::{RequestSortCriterion, WhereEquals};
pub use registry::CriterionRegistry;
pub use set::{CriteriaSet, CriterionEntry};

use crate::model::Entity;
use crate::query::Query;
use crate::repository::Repository;

/// A query transform that can be pushed onto a repository session.
///
/// Identity is the implementing type: popping a criterion removes every entry
/// of the same concrete type. Implementations must not keep references to the
/// query or the repository beyond the call.
pub trait Criterion<M: Entity>: Send + Sync + 'static {
    fn apply(&self, query: Query, repository: &Repository<M>) -> Query;
}
