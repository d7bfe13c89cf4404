//! Mutations. Each applies the scope (never criteria) and publishes lifecycle
//! events around the engine call.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::engine::SyncChanges;
use crate::error::RepositoryError;
use crate::events::{RepositoryAction, Subject};
use crate::model::{Entity, Record, RelationKind, display_key, to_key, to_record};
use crate::query::{Query, WhereConditions};

use super::{Repository, hydrate};

impl<M: Entity> Repository<M> {
    /// Persist a new row; publishes `creating` with the attributes and
    /// `created` with the stored row.
    pub async fn create<A>(&mut self, attributes: &A) -> Result<M, RepositoryError>
    where
        A: Serialize + ?Sized,
    {
        // Inserts are not filtered; the chained query is discarded.
        self.query = Query::new();
        let attributes = to_record(attributes)?;
        hydrate(self.insert_with_events(attributes).await?)
    }

    /// Apply `attributes` to the row with primary key `id`, which must be
    /// visible through the scope. `updating` carries the row before the
    /// change, `updated` the stored row.
    pub async fn update<K, A>(&mut self, id: &K, attributes: &A) -> Result<M, RepositoryError>
    where
        K: Serialize + ?Sized,
        A: Serialize + ?Sized,
    {
        let query = self.scoped_query();
        let key = to_key(id)?;
        let attributes = to_record(attributes)?;

        let current = self.find_record("update", query, key.clone()).await?;
        self.publish(RepositoryAction::Updating, Subject::Entity(current));

        let row = self.update_by_key(key, attributes).await?;
        self.publish(RepositoryAction::Updated, Subject::Entity(row.clone()));
        hydrate(row)
    }

    /// Update the first row matching `attributes` with `values`, or create one
    /// from both. Publishes `creating` before and `updated` after either path.
    pub async fn update_or_create<A, V>(
        &mut self,
        attributes: &A,
        values: &V,
    ) -> Result<M, RepositoryError>
    where
        A: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let query = self.scoped_query();
        let attributes = to_record(attributes)?;
        let values = to_record(values)?;

        let mut merged = attributes.clone();
        merged.extend(values.clone());
        self.publish(RepositoryAction::Creating, Subject::Attributes(merged.clone()));

        let row = match self
            .first_matching("update_or_create", query, &attributes)
            .await?
        {
            Some(existing) => {
                let key = self.primary_key_of(&existing)?;
                self.update_by_key(key, values).await?
            }
            None => self.engine.insert(&self.schema, merged).await?,
        };

        self.publish(RepositoryAction::Updated, Subject::Entity(row.clone()));
        hydrate(row)
    }

    /// Delete the row with primary key `id`. Both `deleting` and `deleted`
    /// carry the row as it was before removal.
    pub async fn delete<K>(&mut self, id: &K) -> Result<u64, RepositoryError>
    where
        K: Serialize + ?Sized,
    {
        let query = self.scoped_query();
        let key = to_key(id)?;

        let snapshot = self.find_record("delete", query, key.clone()).await?;
        self.publish(RepositoryAction::Deleting, Subject::Entity(snapshot.clone()));

        let deleted = self.engine.delete(&self.schema, &self.by_key(key)).await?;
        self.publish(RepositoryAction::Deleted, Subject::Entity(snapshot));
        Ok(deleted)
    }

    /// Delete every scoped row matching `conditions`; events carry the query.
    pub async fn delete_where(
        &mut self,
        conditions: WhereConditions,
    ) -> Result<u64, RepositoryError> {
        let query = self.scoped_query().where_conditions(conditions);
        self.check_relations(&query)?;

        self.publish(RepositoryAction::Deleting, Subject::Query(query.clone()));
        let deleted = self.engine.delete(&self.schema, &query).await?;
        self.publish(RepositoryAction::Deleted, Subject::Query(query));
        Ok(deleted)
    }

    /// Make `relation` of the row `id` reference exactly `ids`.
    pub async fn sync<K, I, V>(
        &mut self,
        id: &K,
        relation: &str,
        ids: I,
    ) -> Result<SyncChanges, RepositoryError>
    where
        K: Serialize + ?Sized,
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        self.sync_relation(id, relation, ids, true).await
    }

    /// Attach `ids` to `relation` of the row `id`, keeping existing links.
    pub async fn sync_without_detaching<K, I, V>(
        &mut self,
        id: &K,
        relation: &str,
        ids: I,
    ) -> Result<SyncChanges, RepositoryError>
    where
        K: Serialize + ?Sized,
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        self.sync_relation(id, relation, ids, false).await
    }

    async fn sync_relation<K, I, V>(
        &mut self,
        id: &K,
        relation: &str,
        ids: I,
        detaching: bool,
    ) -> Result<SyncChanges, RepositoryError>
    where
        K: Serialize + ?Sized,
        I: IntoIterator<Item = V>,
        V: Serialize,
    {
        let query = self.prepared_query();
        let key = to_key(id)?;
        let ids = ids
            .into_iter()
            .map(|id| to_key(&id))
            .collect::<Result<Vec<_>, _>>()?;

        let relation = self.schema.find_relation(relation).cloned().ok_or_else(|| {
            RepositoryError::configuration(format!(
                "relation `{relation}` is not defined on `{}`",
                self.schema.table
            ))
        })?;
        let RelationKind::BelongsToMany { parent_key, .. } = &relation.kind else {
            return Err(RepositoryError::configuration(format!(
                "relation `{}` on `{}` has no pivot table",
                relation.name, self.schema.table
            )));
        };

        let parent = self.find_record("sync", query, key).await?;
        let parent_value = match parent.get(parent_key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                return Err(RepositoryError::validation(format!(
                    "`{}` row has no `{parent_key}` value",
                    self.schema.table
                )));
            }
        };

        let changes = self
            .engine
            .sync_relation(&self.schema, &relation, &parent_value, &ids, detaching)
            .await?;
        debug!(
            repository = %self.id,
            relation = %relation.name,
            attached = changes.attached.len(),
            detached = changes.detached.len(),
            "Relation synced"
        );
        Ok(changes)
    }

    pub(super) async fn insert_with_events(
        &self,
        attributes: Record,
    ) -> Result<Record, RepositoryError> {
        self.publish(RepositoryAction::Creating, Subject::Attributes(attributes.clone()));
        let row = self.engine.insert(&self.schema, attributes).await?;
        self.publish(RepositoryAction::Created, Subject::Entity(row.clone()));
        Ok(row)
    }

    async fn update_by_key(
        &self,
        key: Value,
        attributes: Record,
    ) -> Result<Record, RepositoryError> {
        let rows = self
            .engine
            .update(&self.schema, &self.by_key(key.clone()), attributes)
            .await?;
        rows.into_iter().next().ok_or_else(|| {
            RepositoryError::not_found(self.schema.table.clone(), display_key(&key))
        })
    }
}
