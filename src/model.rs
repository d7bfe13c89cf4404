//! Entity capability and table metadata.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::RepositoryError;

/// Engine-level row shape: column name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Anything a repository can hydrate rows into.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// An entity with a statically known table.
pub trait Model: Entity {
    fn schema() -> Schema;
}

/// Table metadata used by engines to resolve columns and relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub table: String,
    pub primary_key: String,
    /// Declared columns. Empty means the engine accepts any column.
    pub columns: Vec<String>,
    pub relations: Vec<Relation>,
}

impl Schema {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key = key.into();
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn find_relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn declares(&self, column: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|declared| declared == column)
    }

    /// Reject schemas an engine could not address.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if self.table.trim().is_empty() {
            return Err(RepositoryError::configuration(
                "schema must name a table",
            ));
        }
        if self.primary_key.trim().is_empty() {
            return Err(RepositoryError::configuration(format!(
                "schema for `{}` must name a primary key",
                self.table
            )));
        }
        if !self.declares(&self.primary_key) {
            return Err(RepositoryError::configuration(format!(
                "primary key `{}` is not a declared column of `{}`",
                self.primary_key, self.table
            )));
        }
        let mut names: Vec<&str> = self.relations.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(RepositoryError::configuration(format!(
                "relation `{}` is declared twice on `{}`",
                pair[0], self.table
            )));
        }
        Ok(())
    }
}

/// A named association between two tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub kind: RelationKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// `related.foreign_key = parent.local_key`
    HasMany {
        table: String,
        foreign_key: String,
        local_key: String,
    },
    /// `parent.foreign_key = related.owner_key`
    BelongsTo {
        table: String,
        foreign_key: String,
        owner_key: String,
    },
    /// Joined through a pivot table.
    BelongsToMany {
        table: String,
        pivot: String,
        foreign_pivot_key: String,
        related_pivot_key: String,
        parent_key: String,
        related_key: String,
    },
}

impl Relation {
    pub fn has_many(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::HasMany {
                table: table.into(),
                foreign_key: foreign_key.into(),
                local_key: "id".to_string(),
            },
        }
    }

    pub fn belongs_to(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsTo {
                table: table.into(),
                foreign_key: foreign_key.into(),
                owner_key: "id".to_string(),
            },
        }
    }

    pub fn belongs_to_many(
        name: impl Into<String>,
        table: impl Into<String>,
        pivot: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::BelongsToMany {
                table: table.into(),
                pivot: pivot.into(),
                foreign_pivot_key: foreign_pivot_key.into(),
                related_pivot_key: related_pivot_key.into(),
                parent_key: "id".to_string(),
                related_key: "id".to_string(),
            },
        }
    }

    pub fn related_table(&self) -> &str {
        match &self.kind {
            RelationKind::HasMany { table, .. }
            | RelationKind::BelongsTo { table, .. }
            | RelationKind::BelongsToMany { table, .. } => table,
        }
    }

    pub fn is_many(&self) -> bool {
        !matches!(self.kind, RelationKind::BelongsTo { .. })
    }
}

/// Convert any serializable value into a record, rejecting non-objects.
pub fn to_record<T: Serialize + ?Sized>(value: &T) -> Result<Record, RepositoryError> {
    match serde_json::to_value(value)? {
        Value::Object(record) => Ok(record),
        other => Err(RepositoryError::validation(format!(
            "attributes must serialize to an object, got `{other}`"
        ))),
    }
}

/// Convert a key into a JSON value usable in conditions.
pub fn to_key<K: Serialize + ?Sized>(key: &K) -> Result<Value, RepositoryError> {
    match serde_json::to_value(key)? {
        Value::Null => Err(RepositoryError::validation("key must not be null")),
        value @ (Value::Object(_) | Value::Array(_)) => Err(RepositoryError::validation(
            format!("key must be a scalar, got `{value}`"),
        )),
        value => Ok(value),
    }
}

/// Render a key for error messages without JSON string quoting.
pub fn display_key(key: &Value) -> String {
    match key {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
