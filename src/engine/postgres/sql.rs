//! Statement compilation for the Postgres engine.
//!
//! Rows travel as `jsonb`. Identifiers are quoted and every value is bound;
//! comparisons run on `to_jsonb(column)` so one bound `jsonb` parameter works
//! against any column type.

use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

use crate::engine::RawOperation;
use crate::error::EngineError;
use crate::model::{Record, Relation, RelationKind, Schema};
use crate::query::{Condition, Operator, Order, Query};

pub(super) type Statement = QueryBuilder<'static, Postgres>;

/// Alias of the table a statement addresses.
const ROOT: &str = "t";
/// Alias of a pivot table in sync statements.
const PIVOT: &str = "p";

pub(super) fn select(schema: &Schema, query: &Query) -> Result<Statement, EngineError> {
    let mut sql = Statement::new("SELECT ");
    push_row(&mut sql, schema, query)?;
    sql.push(" AS row FROM ");
    sql.push(table_as(&schema.table, ROOT));
    push_filters(&mut sql, schema, ROOT, &query.conditions, 1, " WHERE ")?;
    push_orders(&mut sql, &query.orders);
    if let Some(limit) = query.limit {
        sql.push(" LIMIT ").push_bind(to_i64(limit));
    }
    if let Some(offset) = query.offset {
        sql.push(" OFFSET ").push_bind(to_i64(offset));
    }
    Ok(sql)
}

pub(super) fn count(schema: &Schema, query: &Query) -> Result<Statement, EngineError> {
    let mut sql = Statement::new("SELECT count(*) FROM ");
    sql.push(table_as(&schema.table, ROOT));
    push_filters(&mut sql, schema, ROOT, &query.conditions, 1, " WHERE ")?;
    Ok(sql)
}

pub(super) fn insert(schema: &Schema, attributes: Record) -> Statement {
    let mut sql = Statement::new("INSERT INTO ");
    sql.push(table_as(&schema.table, ROOT));
    if attributes.is_empty() {
        sql.push(" DEFAULT VALUES");
    } else {
        let columns = column_list(&attributes);
        sql.push(format!(
            " ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{}, ",
            quote(&schema.table)
        ));
        sql.push_bind(Json(Value::Object(attributes)));
        sql.push(")");
    }
    sql.push(" RETURNING to_jsonb(t) AS row");
    sql
}

/// `attributes` must not be empty.
pub(super) fn update(
    schema: &Schema,
    query: &Query,
    attributes: Record,
) -> Result<Statement, EngineError> {
    let columns = column_list(&attributes);
    let target = if attributes.len() == 1 {
        columns.clone()
    } else {
        format!("({columns})")
    };

    let mut sql = Statement::new("UPDATE ");
    sql.push(table_as(&schema.table, ROOT));
    sql.push(format!(
        " SET {target} = (SELECT {columns} FROM jsonb_populate_record(NULL::{}, ",
        quote(&schema.table)
    ));
    sql.push_bind(Json(Value::Object(attributes)));
    sql.push("))");
    push_filters(&mut sql, schema, ROOT, &query.conditions, 1, " WHERE ")?;
    sql.push(" RETURNING to_jsonb(t) AS row");
    Ok(sql)
}

pub(super) fn delete(schema: &Schema, query: &Query) -> Result<Statement, EngineError> {
    let mut sql = Statement::new("DELETE FROM ");
    sql.push(table_as(&schema.table, ROOT));
    push_filters(&mut sql, schema, ROOT, &query.conditions, 1, " WHERE ")?;
    Ok(sql)
}

pub(super) fn aggregate(
    schema: &Schema,
    query: &Query,
    operation: &RawOperation,
) -> Result<Statement, EngineError> {
    let expression = match operation {
        RawOperation::Exists => "to_jsonb(count(*) > 0)".to_string(),
        RawOperation::Max(column) => format!("to_jsonb(max({}))", qualified(ROOT, column)),
        RawOperation::Min(column) => format!("to_jsonb(min({}))", qualified(ROOT, column)),
        RawOperation::Sum(column) => format!("to_jsonb(sum({}))", qualified(ROOT, column)),
        RawOperation::Avg(column) => format!("to_jsonb(avg({}))", qualified(ROOT, column)),
        RawOperation::Distinct(column) => {
            let column = qualified(ROOT, column);
            format!(
                "coalesce(jsonb_agg(DISTINCT to_jsonb({column})) FILTER (WHERE {column} IS NOT NULL), '[]'::jsonb)"
            )
        }
    };

    let mut sql = Statement::new(format!("SELECT {expression} FROM "));
    sql.push(table_as(&schema.table, ROOT));
    push_filters(&mut sql, schema, ROOT, &query.conditions, 1, " WHERE ")?;
    Ok(sql)
}

/// The pivot table half of a many-to-many relation.
#[derive(Debug, Clone, Copy)]
pub(super) struct Pivot<'r> {
    table: &'r str,
    foreign_key: &'r str,
    related_key: &'r str,
}

impl<'r> Pivot<'r> {
    pub(super) fn of(relation: &'r Relation) -> Result<Self, EngineError> {
        match &relation.kind {
            RelationKind::BelongsToMany {
                pivot,
                foreign_pivot_key,
                related_pivot_key,
                ..
            } => Ok(Self {
                table: pivot,
                foreign_key: foreign_pivot_key,
                related_key: related_pivot_key,
            }),
            _ => Err(EngineError::validation(format!(
                "relation `{}` has no pivot table",
                relation.name
            ))),
        }
    }

    /// Related ids currently attached to `parent`.
    pub(super) fn related_ids(&self, parent: &Value) -> Statement {
        let mut sql = Statement::new(format!(
            "SELECT to_jsonb({}) FROM {} WHERE to_jsonb({}) = ",
            qualified(PIVOT, self.related_key),
            table_as(self.table, PIVOT),
            qualified(PIVOT, self.foreign_key)
        ));
        sql.push_bind(Json(parent.clone()));
        sql
    }

    /// `ids` must not be empty.
    pub(super) fn detach(&self, parent: &Value, ids: &[Value]) -> Statement {
        let mut sql = Statement::new(format!(
            "DELETE FROM {} WHERE to_jsonb({}) = ",
            table_as(self.table, PIVOT),
            qualified(PIVOT, self.foreign_key)
        ));
        sql.push_bind(Json(parent.clone()));
        sql.push(format!(
            " AND to_jsonb({}) IN (",
            qualified(PIVOT, self.related_key)
        ));
        push_bound_list(&mut sql, ids);
        sql.push(")");
        sql
    }

    pub(super) fn attach(&self, parent: &Value, id: &Value) -> Statement {
        let columns = format!("{}, {}", quote(self.foreign_key), quote(self.related_key));
        let mut row = Record::new();
        row.insert(self.foreign_key.to_string(), parent.clone());
        row.insert(self.related_key.to_string(), id.clone());

        let mut sql = Statement::new(format!(
            "INSERT INTO {} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{}, ",
            quote(self.table),
            quote(self.table)
        ));
        sql.push_bind(Json(Value::Object(row)));
        sql.push(")");
        sql
    }
}

/// The `jsonb` row expression: base columns plus eager relations and counts.
fn push_row(sql: &mut Statement, schema: &Schema, query: &Query) -> Result<(), EngineError> {
    if query.selects_all() {
        sql.push(format!("to_jsonb({ROOT})"));
    } else {
        let pairs: Vec<String> = query
            .select
            .iter()
            .map(|column| format!("{}, {}", literal(column), qualified(ROOT, column)))
            .collect();
        sql.push(format!("jsonb_build_object({})", pairs.join(", ")));
    }

    if query.eager.is_empty() && query.counts.is_empty() {
        return Ok(());
    }

    let mut extras = Vec::with_capacity(query.eager.len() + query.counts.len());
    for name in &query.eager {
        let relation = find_relation(schema, name)?;
        let related = alias("r", 1);
        let value = if relation.is_many() {
            format!("coalesce(jsonb_agg(to_jsonb({related})), '[]'::jsonb)")
        } else {
            format!("to_jsonb({related})")
        };
        let limit = if relation.is_many() { "" } else { " LIMIT 1" };
        extras.push(format!(
            "{}, (SELECT {value}{}{limit})",
            literal(name),
            relation_source(relation, ROOT, 1)
        ));
    }
    for name in &query.counts {
        let relation = find_relation(schema, name)?;
        extras.push(format!(
            "{}, (SELECT count(*){})",
            literal(&format!("{name}_count")),
            relation_source(relation, ROOT, 1)
        ));
    }
    sql.push(format!(" || jsonb_build_object({})", extras.join(", ")));
    Ok(())
}

fn push_filters(
    sql: &mut Statement,
    schema: &Schema,
    table_alias: &str,
    conditions: &[Condition],
    depth: usize,
    first_separator: &'static str,
) -> Result<(), EngineError> {
    let mut separator = first_separator;
    for condition in conditions {
        sql.push(separator);
        separator = " AND ";
        push_condition(sql, schema, table_alias, condition, depth)?;
    }
    Ok(())
}

fn push_condition(
    sql: &mut Statement,
    schema: &Schema,
    table_alias: &str,
    condition: &Condition,
    depth: usize,
) -> Result<(), EngineError> {
    match condition {
        Condition::Compare {
            column,
            operator,
            value,
        } => match operator {
            Operator::Like | Operator::NotLike | Operator::ILike => {
                sql.push(format!(
                    "{}::text {} ",
                    qualified(table_alias, column),
                    operator.as_sql()
                ));
                sql.push_bind(pattern(value));
            }
            _ => {
                sql.push(format!(
                    "to_jsonb({}) {} ",
                    qualified(table_alias, column),
                    operator.as_sql()
                ));
                sql.push_bind(Json(value.clone()));
            }
        },
        Condition::In {
            column,
            values,
            negated,
        } => {
            let column = qualified(table_alias, column);
            match (values.is_empty(), negated) {
                (true, false) => {
                    sql.push("FALSE");
                }
                (true, true) => {
                    sql.push(format!("{column} IS NOT NULL"));
                }
                (false, negated) => {
                    let keyword = if *negated { "NOT IN" } else { "IN" };
                    sql.push(format!("to_jsonb({column}) {keyword} ("));
                    push_bound_list(sql, values);
                    sql.push(")");
                }
            }
        }
        Condition::Between { column, low, high } => {
            sql.push(format!("to_jsonb({}) BETWEEN ", qualified(table_alias, column)));
            sql.push_bind(Json(low.clone()));
            sql.push(" AND ");
            sql.push_bind(Json(high.clone()));
        }
        Condition::Null { column, negated } => {
            let check = if *negated { "IS NOT NULL" } else { "IS NULL" };
            sql.push(format!("{} {check}", qualified(table_alias, column)));
        }
        Condition::Has {
            relation,
            constraint,
        } => {
            let relation = find_relation(schema, relation)?;
            sql.push(format!(
                "EXISTS (SELECT 1{}",
                relation_source(relation, table_alias, depth)
            ));
            if let Some(constraint) = constraint {
                let related = Schema::new(relation.related_table());
                push_filters(
                    sql,
                    &related,
                    &alias("r", depth),
                    &constraint.conditions,
                    depth + 1,
                    " AND ",
                )?;
            }
            sql.push(")");
        }
    }
    Ok(())
}

/// ` FROM <related> WHERE <join>` for a relation of the row aliased `parent`.
fn relation_source(relation: &Relation, parent: &str, depth: usize) -> String {
    let related = alias("r", depth);
    match &relation.kind {
        RelationKind::HasMany {
            table,
            foreign_key,
            local_key,
        } => format!(
            " FROM {} WHERE {} = {}",
            table_as(table, &related),
            qualified(&related, foreign_key),
            qualified(parent, local_key)
        ),
        RelationKind::BelongsTo {
            table,
            foreign_key,
            owner_key,
        } => format!(
            " FROM {} WHERE {} = {}",
            table_as(table, &related),
            qualified(&related, owner_key),
            qualified(parent, foreign_key)
        ),
        RelationKind::BelongsToMany {
            table,
            pivot,
            foreign_pivot_key,
            related_pivot_key,
            parent_key,
            related_key,
        } => {
            let pivot_alias = alias("p", depth);
            format!(
                " FROM {} JOIN {} ON {} = {} WHERE {} = {}",
                table_as(table, &related),
                table_as(pivot, &pivot_alias),
                qualified(&pivot_alias, related_pivot_key),
                qualified(&related, related_key),
                qualified(&pivot_alias, foreign_pivot_key),
                qualified(parent, parent_key)
            )
        }
    }
}

fn push_orders(sql: &mut Statement, orders: &[Order]) {
    if orders.is_empty() {
        return;
    }
    let terms: Vec<String> = orders
        .iter()
        .map(|order| {
            format!(
                "{} {}",
                qualified(ROOT, &order.column),
                order.direction.as_sql()
            )
        })
        .collect();
    sql.push(format!(" ORDER BY {}", terms.join(", ")));
}

fn push_bound_list(sql: &mut Statement, values: &[Value]) {
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            sql.push(", ");
        }
        sql.push_bind(Json(value.clone()));
    }
}

fn find_relation<'s>(schema: &'s Schema, name: &str) -> Result<&'s Relation, EngineError> {
    schema.find_relation(name).ok_or_else(|| {
        EngineError::validation(format!(
            "relation `{name}` is not defined on `{}`",
            schema.table
        ))
    })
}

fn alias(prefix: &str, depth: usize) -> String {
    format!("{prefix}{depth}")
}

pub(super) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn qualified(table_alias: &str, column: &str) -> String {
    format!("{table_alias}.{}", quote(column))
}

fn table_as(table: &str, table_alias: &str) -> String {
    format!("{} AS {table_alias}", quote(table))
}

fn column_list(attributes: &Record) -> String {
    attributes
        .keys()
        .map(|column| quote(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn pattern(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
