//! The query value a repository session builds up between terminal calls.
//!
//! Every builder method consumes the query and returns the transformed one, so
//! a session replaces its stored query rather than mutating it in place.

mod conditions;

pub use conditions::{WhereClause, WhereConditions};

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

/// Comparison operator for a single-column condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    ILike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::ILike => "ILIKE",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operator `{0}`")]
pub struct UnknownOperator(pub String);

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let operator = match normalized.as_str() {
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "ilike" => Operator::ILike,
            _ => return Err(UnknownOperator(value.to_string())),
        };
        Ok(operator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort direction `{0}`")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Direction::Asc),
            "desc" => Ok(Direction::Desc),
            _ => Err(UnknownDirection(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    Compare {
        column: String,
        operator: Operator,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        column: String,
        low: Value,
        high: Value,
    },
    Null {
        column: String,
        negated: bool,
    },
    /// Relation existence, optionally constrained by a query on the related table.
    Has {
        relation: String,
        constraint: Option<Box<Query>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Query {
    /// Selected columns; empty selects every column.
    pub select: Vec<String>,
    pub conditions: Vec<Condition>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Relations to eager load.
    pub eager: Vec<String>,
    /// Relations to count into `{relation}_count`.
    pub counts: Vec<String>,
    pub hidden: Vec<String>,
    pub visible: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.select = columns
            .into_iter()
            .map(|column| column.as_ref().to_string())
            .filter(|column| column != "*")
            .collect();
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, Operator::Eq, value)
    }

    /// Add a comparison; `= null` and `<> null` become null checks.
    pub fn where_op(
        mut self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        let column = column.into();
        let value = value.into();
        let condition = match (operator, value) {
            (Operator::Eq, Value::Null) => Condition::Null {
                column,
                negated: false,
            },
            (Operator::Ne, Value::Null) => Condition::Null {
                column,
                negated: true,
            },
            (operator, value) => Condition::Compare {
                column,
                operator,
                value,
            },
        };
        self.conditions.push(condition);
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        });
        self
    }

    pub fn where_not_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        });
        self
    }

    pub fn where_between(
        mut self,
        column: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Self {
        self.conditions.push(Condition::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        });
        self
    }

    pub fn where_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::Null {
            column: column.into(),
            negated: false,
        });
        self
    }

    pub fn where_not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::Null {
            column: column.into(),
            negated: true,
        });
        self
    }

    pub fn where_conditions(self, conditions: WhereConditions) -> Self {
        conditions.apply(self)
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for relation in relations {
            let relation = relation.into();
            if !self.eager.contains(&relation) {
                self.eager.push(relation);
            }
        }
        self
    }

    pub fn with_count<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for relation in relations {
            let relation = relation.into();
            if !self.counts.contains(&relation) {
                self.counts.push(relation);
            }
        }
        self
    }

    pub fn has(mut self, relation: impl Into<String>) -> Self {
        self.conditions.push(Condition::Has {
            relation: relation.into(),
            constraint: None,
        });
        self
    }

    /// Require at least one related row matching the query built by `constrain`.
    pub fn where_has<F>(mut self, relation: impl Into<String>, constrain: F) -> Self
    where
        F: FnOnce(Query) -> Query,
    {
        let constraint = constrain(Query::new());
        self.conditions.push(Condition::Has {
            relation: relation.into(),
            constraint: Some(Box::new(constraint)),
        });
        self
    }

    pub fn hidden<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hidden = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn visible<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.visible = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Every relation name the query touches, for schema validation.
    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.eager
            .iter()
            .chain(self.counts.iter())
            .map(String::as_str)
            .chain(self.conditions.iter().filter_map(|condition| match condition {
                Condition::Has { relation, .. } => Some(relation.as_str()),
                _ => None,
            }))
    }

    pub fn selects_all(&self) -> bool {
        self.select.is_empty()
    }
}
