use serde_json::Value;
use tracing::debug;

use crate::model::Entity;
use crate::query::{Direction, Query};
use crate::repository::Repository;

use super::Criterion;

/// Orders by the `sort[column]=asc|desc` pairs of the current request.
///
/// Columns the schema does not declare and unknown directions are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSortCriterion;

impl<M: Entity> Criterion<M> for RequestSortCriterion {
    fn apply(&self, query: Query, repository: &Repository<M>) -> Query {
        let param = &repository.settings().sort.param;
        let schema = repository.schema();

        repository
            .request()
            .indexed(param)
            .into_iter()
            .fold(query, |query, (column, direction)| {
                if !schema.declares(&column) {
                    debug!(table = %schema.table, %column, "Ignoring sort on undeclared column");
                    return query;
                }
                match direction.parse::<Direction>() {
                    Ok(direction) => query.order_by(column, direction),
                    Err(err) => {
                        debug!(table = %schema.table, %column, error = %err, "Ignoring sort");
                        query
                    }
                }
            })
    }
}

/// `column = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereEquals {
    column: String,
    value: Value,
}

impl WhereEquals {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl<M: Entity> Criterion<M> for WhereEquals {
    fn apply(&self, query: Query, _repository: &Repository<M>) -> Query {
        query.where_eq(self.column.clone(), self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Settings;
    use crate::engine::MemoryEngine;
    use crate::model::{Record, Schema};
    use crate::query::Order;
    use crate::request::RequestContext;

    fn repository(request: RequestContext) -> Repository<Record> {
        let schema = Schema::new("posts").columns(["id", "title", "views"]);
        Repository::with_schema(Arc::new(MemoryEngine::new()), Arc::new(Settings::default()), schema)
            .expect("valid schema")
            .with_request(request)
    }

    #[test]
    fn request_sort_orders_by_declared_columns() {
        let request =
            RequestContext::from_query_string("/posts", "sort[title]=desc&sort[secret]=asc&sort[views]=sideways&sort[id]=asc");
        let repository = repository(request);

        let query = RequestSortCriterion.apply(Query::new(), &repository);
        assert_eq!(
            query.orders,
            vec![
                Order {
                    column: "title".into(),
                    direction: Direction::Desc
                },
                Order {
                    column: "id".into(),
                    direction: Direction::Asc
                },
            ]
        );
    }

    #[test]
    fn request_without_sort_leaves_query_alone() {
        let repository = repository(RequestContext::new("/posts"));
        assert_eq!(RequestSortCriterion.apply(Query::new(), &repository), Query::new());
    }
}
