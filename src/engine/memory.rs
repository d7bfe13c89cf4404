//! In-process engine over JSON records.
//!
//! Conditions follow SQL null semantics: comparisons against a missing or null
//! column never match, and ordering puts nulls last when ascending.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Number, Value};
use tracing::debug;

use crate::error::EngineError;
use crate::lock::{rw_read, rw_write};
use crate::model::{Record, Relation, RelationKind, Schema};
use crate::query::{Condition, Direction, Operator, Order, Query};

use super::{Engine, RawOperation, SyncChanges};

const SOURCE: &str = "engine::memory";

static NULL: Value = Value::Null;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Record>,
    /// Last integer key handed out or seen.
    last_id: i64,
}

type Tables = HashMap<String, Table>;

/// Tables of records behind a single lock.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: RwLock<Tables>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows as-is, bypassing column checks. Integer `id` values advance
    /// the key sequence.
    pub fn seed<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Record>,
    {
        let mut tables = rw_write(&self.tables, SOURCE, "seed");
        let table = tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(id) = row.get("id").and_then(Value::as_i64) {
                table.last_id = table.last_id.max(id);
            }
            table.rows.push(row);
        }
    }

    /// Snapshot of a table in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        rw_read(&self.tables, SOURCE, "rows")
            .get(table)
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    fn select_rows(&self, schema: &Schema, query: &Query) -> Result<Vec<Record>, EngineError> {
        let tables = rw_read(&self.tables, SOURCE, "select");
        let evaluator = Evaluator { tables: &tables };

        let mut rows = evaluator.filter(schema, query)?;
        rows.sort_by(|a, b| compare_rows(a, b, &query.orders));

        let offset = to_usize(query.offset.unwrap_or(0));
        let limit = query.limit.map_or(usize::MAX, to_usize);
        let rows = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| evaluator.shape(schema, query, row))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(table = %schema.table, rows = rows.len(), "Memory select");
        Ok(rows)
    }

    fn count_rows(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError> {
        let tables = rw_read(&self.tables, SOURCE, "count");
        let matched = Evaluator { tables: &tables }.filter(schema, query)?;
        Ok(matched.len() as u64)
    }

    fn insert_row(&self, schema: &Schema, mut attributes: Record) -> Result<Record, EngineError> {
        check_columns(schema, &attributes)?;

        let mut tables = rw_write(&self.tables, SOURCE, "insert");
        let table = tables.entry(schema.table.clone()).or_default();
        let key = &schema.primary_key;

        let provided = attributes.get(key).filter(|id| !id.is_null()).cloned();
        match provided {
            None => {
                table.last_id += 1;
                attributes.insert(key.clone(), Value::from(table.last_id));
            }
            Some(id) => {
                if table.rows.iter().any(|row| loose_eq(field(row, key), &id)) {
                    return Err(EngineError::Duplicate {
                        constraint: format!("{}_pkey", schema.table),
                    });
                }
                if let Some(id) = id.as_i64() {
                    table.last_id = table.last_id.max(id);
                }
            }
        }

        table.rows.push(attributes.clone());
        Ok(attributes)
    }

    fn update_rows(
        &self,
        schema: &Schema,
        query: &Query,
        attributes: Record,
    ) -> Result<Vec<Record>, EngineError> {
        check_columns(schema, &attributes)?;

        let mut tables = rw_write(&self.tables, SOURCE, "update");
        let positions = Evaluator { tables: &tables }.positions(schema, query)?;
        let Some(table) = tables.get_mut(&schema.table) else {
            return Ok(Vec::new());
        };

        let mut updated = Vec::with_capacity(positions.len());
        for position in positions {
            if let Some(row) = table.rows.get_mut(position) {
                for (column, value) in &attributes {
                    row.insert(column.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    fn delete_rows(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError> {
        let mut tables = rw_write(&self.tables, SOURCE, "delete");
        let positions = Evaluator { tables: &tables }.positions(schema, query)?;
        let Some(table) = tables.get_mut(&schema.table) else {
            return Ok(0);
        };

        let mut position = 0;
        table.rows.retain(|_| {
            let keep = positions.binary_search(&position).is_err();
            position += 1;
            keep
        });
        Ok(positions.len() as u64)
    }

    fn sync_pivot(
        &self,
        relation: &Relation,
        parent: &Value,
        ids: &[Value],
        detaching: bool,
    ) -> Result<SyncChanges, EngineError> {
        let RelationKind::BelongsToMany {
            pivot,
            foreign_pivot_key,
            related_pivot_key,
            ..
        } = &relation.kind
        else {
            return Err(EngineError::validation(format!(
                "relation `{}` has no pivot table",
                relation.name
            )));
        };

        let mut tables = rw_write(&self.tables, SOURCE, "sync");
        let pivot = tables.entry(pivot.clone()).or_default();
        let owned_by_parent = |row: &Record| loose_eq(field(row, foreign_pivot_key), parent);

        let current: Vec<Value> = pivot
            .rows
            .iter()
            .filter(|row| owned_by_parent(*row))
            .map(|row| field(row, related_pivot_key).clone())
            .collect();

        let mut changes = SyncChanges::default();
        if detaching {
            changes.detached = current
                .iter()
                .filter(|id| !contains(ids, id))
                .cloned()
                .collect();
            pivot.rows.retain(|row| {
                !(owned_by_parent(row)
                    && contains(&changes.detached, field(row, related_pivot_key)))
            });
        }

        for id in ids {
            if contains(&current, id) || contains(&changes.attached, id) {
                continue;
            }
            let mut row = Record::new();
            row.insert(foreign_pivot_key.clone(), parent.clone());
            row.insert(related_pivot_key.clone(), id.clone());
            pivot.rows.push(row);
            changes.attached.push(id.clone());
        }

        Ok(changes)
    }

    fn aggregate(
        &self,
        schema: &Schema,
        query: &Query,
        operation: &RawOperation,
    ) -> Result<Value, EngineError> {
        let tables = rw_read(&self.tables, SOURCE, "raw");
        let rows = Evaluator { tables: &tables }.filter(schema, query)?;
        let column_values = |column: &str| -> Vec<&Value> {
            rows.iter()
                .map(|row| field(row, column))
                .filter(|value| !value.is_null())
                .collect()
        };

        let value = match operation {
            RawOperation::Exists => Value::Bool(!rows.is_empty()),
            RawOperation::Max(column) => column_values(column)
                .into_iter()
                .max_by(|a, b| order(a, b).unwrap_or(Ordering::Equal))
                .cloned()
                .unwrap_or(Value::Null),
            RawOperation::Min(column) => column_values(column)
                .into_iter()
                .min_by(|a, b| order(a, b).unwrap_or(Ordering::Equal))
                .cloned()
                .unwrap_or(Value::Null),
            RawOperation::Sum(column) => sum(&numbers(column, column_values(column))?),
            RawOperation::Avg(column) => {
                let numbers = numbers(column, column_values(column))?;
                if numbers.is_empty() {
                    Value::Null
                } else {
                    let total: f64 = numbers.iter().filter_map(|n| n.as_f64()).sum();
                    float(total / numbers.len() as f64)
                }
            }
            RawOperation::Distinct(column) => {
                let mut distinct: Vec<Value> = Vec::new();
                for value in column_values(column) {
                    if !contains(&distinct, value) {
                        distinct.push(value.clone());
                    }
                }
                Value::Array(distinct)
            }
        };
        Ok(value)
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn select(&self, schema: &Schema, query: &Query) -> Result<Vec<Record>, EngineError> {
        self.select_rows(schema, query)
    }

    async fn count(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError> {
        self.count_rows(schema, query)
    }

    async fn insert(&self, schema: &Schema, attributes: Record) -> Result<Record, EngineError> {
        self.insert_row(schema, attributes)
    }

    async fn update(
        &self,
        schema: &Schema,
        query: &Query,
        attributes: Record,
    ) -> Result<Vec<Record>, EngineError> {
        self.update_rows(schema, query, attributes)
    }

    async fn delete(&self, schema: &Schema, query: &Query) -> Result<u64, EngineError> {
        self.delete_rows(schema, query)
    }

    async fn sync_relation(
        &self,
        _schema: &Schema,
        relation: &Relation,
        parent: &Value,
        ids: &[Value],
        detaching: bool,
    ) -> Result<SyncChanges, EngineError> {
        self.sync_pivot(relation, parent, ids, detaching)
    }

    async fn raw(
        &self,
        schema: &Schema,
        query: &Query,
        operation: &RawOperation,
    ) -> Result<Value, EngineError> {
        self.aggregate(schema, query, operation)
    }
}

/// Condition evaluation over a consistent view of every table.
struct Evaluator<'a> {
    tables: &'a Tables,
}

impl<'a> Evaluator<'a> {
    fn rows(&self, table: &str) -> &'a [Record] {
        self.tables
            .get(table)
            .map(|table| table.rows.as_slice())
            .unwrap_or(&[])
    }

    fn filter(&self, schema: &Schema, query: &Query) -> Result<Vec<&'a Record>, EngineError> {
        let mut matched = Vec::new();
        for row in self.rows(&schema.table) {
            if self.matches(schema, row, &query.conditions)? {
                matched.push(row);
            }
        }
        Ok(matched)
    }

    /// Ascending positions of the rows matching `query`.
    fn positions(&self, schema: &Schema, query: &Query) -> Result<Vec<usize>, EngineError> {
        let mut positions = Vec::new();
        for (position, row) in self.rows(&schema.table).iter().enumerate() {
            if self.matches(schema, row, &query.conditions)? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    fn matches(
        &self,
        schema: &Schema,
        row: &Record,
        conditions: &[Condition],
    ) -> Result<bool, EngineError> {
        for condition in conditions {
            if !self.matches_one(schema, row, condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_one(
        &self,
        schema: &Schema,
        row: &Record,
        condition: &Condition,
    ) -> Result<bool, EngineError> {
        let matched = match condition {
            Condition::Compare {
                column,
                operator,
                value,
            } => compare(field(row, column), *operator, value),
            Condition::In {
                column,
                values,
                negated,
            } => {
                let value = field(row, column);
                !value.is_null() && contains(values, value) != *negated
            }
            Condition::Between { column, low, high } => {
                let value = field(row, column);
                matches!(order(value, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(order(value, high), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::Null { column, negated } => field(row, column).is_null() != *negated,
            Condition::Has {
                relation,
                constraint,
            } => {
                let relation = find_relation(schema, relation)?;
                let related = self.related(relation, row);
                match constraint {
                    None => !related.is_empty(),
                    Some(constraint) => {
                        let related_schema = Schema::new(relation.related_table());
                        let mut any = false;
                        for candidate in related {
                            if self.matches(&related_schema, candidate, &constraint.conditions)? {
                                any = true;
                                break;
                            }
                        }
                        any
                    }
                }
            }
        };
        Ok(matched)
    }

    fn related(&self, relation: &Relation, row: &Record) -> Vec<&'a Record> {
        match &relation.kind {
            RelationKind::HasMany {
                table,
                foreign_key,
                local_key,
            } => self.rows_where(table, foreign_key, field(row, local_key)),
            RelationKind::BelongsTo {
                table,
                foreign_key,
                owner_key,
            } => self.rows_where(table, owner_key, field(row, foreign_key)),
            RelationKind::BelongsToMany {
                table,
                pivot,
                foreign_pivot_key,
                related_pivot_key,
                parent_key,
                related_key,
            } => {
                let ids: Vec<Value> = self
                    .rows_where(pivot, foreign_pivot_key, field(row, parent_key))
                    .into_iter()
                    .map(|pivot_row| field(pivot_row, related_pivot_key).clone())
                    .collect();
                self.rows(table)
                    .iter()
                    .filter(|candidate| contains(&ids, field(candidate, related_key)))
                    .collect()
            }
        }
    }

    fn rows_where(&self, table: &str, column: &str, key: &Value) -> Vec<&'a Record> {
        if key.is_null() {
            return Vec::new();
        }
        self.rows(table)
            .iter()
            .filter(|candidate| loose_eq(field(candidate, column), key))
            .collect()
    }

    /// Project selected columns and attach eager relations and counts.
    fn shape(&self, schema: &Schema, query: &Query, row: &Record) -> Result<Record, EngineError> {
        let mut shaped: Record = if query.selects_all() {
            row.clone()
        } else {
            query
                .select
                .iter()
                .map(|column| (column.clone(), field(row, column).clone()))
                .collect()
        };

        for name in &query.eager {
            let relation = find_relation(schema, name)?;
            let related = self.related(relation, row);
            let value = if relation.is_many() {
                Value::Array(related.into_iter().cloned().map(Value::Object).collect())
            } else {
                related
                    .first()
                    .map(|record| Value::Object((*record).clone()))
                    .unwrap_or(Value::Null)
            };
            shaped.insert(name.clone(), value);
        }

        for name in &query.counts {
            let relation = find_relation(schema, name)?;
            let count = self.related(relation, row).len();
            shaped.insert(format!("{name}_count"), Value::from(count));
        }

        Ok(shaped)
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

fn check_columns(schema: &Schema, attributes: &Record) -> Result<(), EngineError> {
    match attributes.keys().find(|column| !schema.declares(column)) {
        Some(column) => Err(EngineError::validation(format!(
            "`{column}` is not a column of `{}`",
            schema.table
        ))),
        None => Ok(()),
    }
}

fn field<'r>(row: &'r Record, column: &str) -> &'r Value {
    row.get(column).unwrap_or(&NULL)
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Ordering between two scalars of the same kind; `None` across kinds.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Equality treating `1` and `1.0` as the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    order(a, b) == Some(Ordering::Equal) || a == b
}

fn contains(values: &[Value], value: &Value) -> bool {
    values.iter().any(|candidate| loose_eq(candidate, value))
}

fn compare(value: &Value, operator: Operator, target: &Value) -> bool {
    if value.is_null() || target.is_null() {
        return false;
    }
    match operator {
        Operator::Eq => loose_eq(value, target),
        Operator::Ne => !loose_eq(value, target),
        Operator::Lt => order(value, target) == Some(Ordering::Less),
        Operator::Lte => matches!(order(value, target), Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => order(value, target) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            order(value, target),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Like => like(value, target, false) == Some(true),
        Operator::NotLike => like(value, target, false) == Some(false),
        Operator::ILike => like(value, target, true) == Some(true),
    }
}

fn like(value: &Value, pattern: &Value, case_insensitive: bool) -> Option<bool> {
    let text = match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => return None,
    };
    let pattern = pattern.as_str()?;
    let (text, pattern) = if case_insensitive {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text, pattern.to_string())
    };
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    Some(like_match(&text, &pattern))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

fn like_tokens(pattern: &[char]) -> Vec<LikeToken> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.iter();
    while let Some(&c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => LikeToken::Char(chars.next().copied().unwrap_or('\\')),
            other => LikeToken::Char(other),
        });
    }
    tokens
}

/// SQL `LIKE`: `%` matches any run, `_` one character, `\` escapes.
///
/// Greedy two-pointer scan; a mismatch backtracks only to the last `%`.
fn like_match(text: &[char], pattern: &[char]) -> bool {
    let tokens = like_tokens(pattern);
    let (mut t, mut p) = (0, 0);
    let mut resume: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::Any) => {
                resume = Some((p, t));
                p += 1;
            }
            Some(LikeToken::One) => {
                t += 1;
                p += 1;
            }
            Some(LikeToken::Char(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match resume {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    resume = Some((star, t));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == LikeToken::Any)
}

fn compare_rows(a: &Record, b: &Record, orders: &[Order]) -> Ordering {
    orders
        .iter()
        .map(|order| {
            let ordering = sort_order(field(a, &order.column), field(b, &order.column));
            match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => order(a, b).unwrap_or(Ordering::Equal),
    }
}

fn numbers<'v>(column: &str, values: Vec<&'v Value>) -> Result<Vec<&'v Number>, EngineError> {
    values
        .into_iter()
        .map(|value| {
            value.as_number().ok_or_else(|| {
                EngineError::validation(format!("column `{column}` holds a non-numeric value"))
            })
        })
        .collect()
}

fn sum(numbers: &[&Number]) -> Value {
    if numbers.is_empty() {
        return Value::Null;
    }
    let integers: Option<i64> = numbers
        .iter()
        .try_fold(0_i64, |total, number| total.checked_add(number.as_i64()?));
    match integers {
        Some(total) => Value::from(total),
        None => float(numbers.iter().filter_map(|number| number.as_f64()).sum()),
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
