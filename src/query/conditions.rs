use serde_json::Value;

use crate::error::RepositoryError;

use super::{Operator, Query};

/// One `where` entry: plain equality or an explicit operator.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    Equals {
        field: String,
        value: Value,
    },
    Operator {
        field: String,
        operator: Operator,
        value: Value,
    },
}

/// Ordered `where` conditions as accepted by `count`, `find_where` and
/// `delete_where`.
///
/// The JSON form mirrors the condition maps applications usually pass around:
///
/// ```json
/// { "status": "open", "priority": [">=", 3], "0": ["owner", "!=", "bot"] }
/// ```
///
/// A two-element array is `[operator, value]` for the keyed field; a
/// three-element array is `[field, operator, value]` and ignores the key. A top
/// level array of three-element arrays is accepted as well.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereConditions(Vec<WhereClause>);

impl WhereConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push(WhereClause::Equals {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn op(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.0.push(WhereClause::Operator {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clauses(&self) -> &[WhereClause] {
        &self.0
    }

    pub fn from_json(value: &Value) -> Result<Self, RepositoryError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(entries) => {
                let mut conditions = Self::new();
                for (field, entry) in entries {
                    conditions = match entry {
                        Value::Array(parts) => conditions.push_array(Some(field), parts)?,
                        value => conditions.eq(field.clone(), value.clone()),
                    };
                }
                Ok(conditions)
            }
            Value::Array(entries) => {
                let mut conditions = Self::new();
                for entry in entries {
                    let Value::Array(parts) = entry else {
                        return Err(RepositoryError::validation(format!(
                            "condition list entries must be arrays, got `{entry}`"
                        )));
                    };
                    conditions = conditions.push_array(None, parts)?;
                }
                Ok(conditions)
            }
            other => Err(RepositoryError::validation(format!(
                "conditions must be an object or an array, got `{other}`"
            ))),
        }
    }

    fn push_array(self, field: Option<&String>, parts: &[Value]) -> Result<Self, RepositoryError> {
        match (field, parts) {
            (Some(field), [operator, value]) => {
                Ok(self.op(field.clone(), parse_operator(operator)?, value.clone()))
            }
            (_, [Value::String(field), operator, value]) => {
                Ok(self.op(field.clone(), parse_operator(operator)?, value.clone()))
            }
            _ => Err(RepositoryError::validation(format!(
                "malformed condition `{}`",
                Value::Array(parts.to_vec())
            ))),
        }
    }

    pub(crate) fn apply(self, query: Query) -> Query {
        self.0.into_iter().fold(query, |query, clause| match clause {
            WhereClause::Equals { field, value } => query.where_eq(field, value),
            WhereClause::Operator {
                field,
                operator,
                value,
            } => query.where_op(field, operator, value),
        })
    }
}

impl TryFrom<Value> for WhereConditions {
    type Error = RepositoryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

fn parse_operator(value: &Value) -> Result<Operator, RepositoryError> {
    let Value::String(text) = value else {
        return Err(RepositoryError::validation(format!(
            "operator must be a string, got `{value}`"
        )));
    };
    text.parse()
        .map_err(|err: super::UnknownOperator| RepositoryError::validation(err.to_string()))
}
