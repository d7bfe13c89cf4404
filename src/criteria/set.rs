use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use crate::error::RepositoryError;
use crate::model::Entity;

use super::{Criterion, CriterionRegistry};

/// A pushed criterion together with the identity used to pop it.
pub struct CriterionEntry<M: Entity> {
    type_id: TypeId,
    type_name: &'static str,
    alias: Option<String>,
    criterion: Arc<dyn Criterion<M>>,
}

impl<M: Entity> CriterionEntry<M> {
    pub fn new<C: Criterion<M>>(criterion: C) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: type_name::<C>(),
            alias: None,
            criterion: Arc::new(criterion),
        }
    }

    pub(crate) fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn criterion(&self) -> &dyn Criterion<M> {
        self.criterion.as_ref()
    }

    pub fn is<C: Criterion<M>>(&self) -> bool {
        self.type_id == TypeId::of::<C>()
    }

    /// Matches the full type path, its last segment, or the registered alias.
    pub fn is_named(&self, name: &str) -> bool {
        self.type_name == name
            || short_name(self.type_name) == name
            || self.alias.as_deref() == Some(name)
    }
}

impl<M: Entity> Clone for CriterionEntry<M> {
    fn clone(&self) -> Self {
        Self {
            type_id: self.type_id,
            type_name: self.type_name,
            alias: self.alias.clone(),
            criterion: Arc::clone(&self.criterion),
        }
    }
}

impl<M: Entity> fmt::Debug for CriterionEntry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CriterionEntry")
            .field("type_name", &self.type_name)
            .field("alias", &self.alias)
            .finish()
    }
}

/// Ordered criteria, applied in push order. Duplicates are kept.
pub struct CriteriaSet<M: Entity> {
    entries: Vec<CriterionEntry<M>>,
}

impl<M: Entity> CriteriaSet<M> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push<C: Criterion<M>>(&mut self, criterion: C) {
        self.entries.push(CriterionEntry::new(criterion));
    }

    pub fn push_entry(&mut self, entry: CriterionEntry<M>) {
        self.entries.push(entry);
    }

    /// Instantiate the criterion registered under `name` and append it.
    pub fn push_named(
        &mut self,
        name: &str,
        registry: &CriterionRegistry<M>,
    ) -> Result<(), RepositoryError> {
        let entry = registry.instantiate(name)?;
        self.entries.push(entry);
        Ok(())
    }

    /// Remove every entry of the same type as `criterion`.
    pub fn pop<C: Criterion<M>>(&mut self, _criterion: &C) -> usize {
        self.pop_type::<C>()
    }

    pub fn pop_type<C: Criterion<M>>(&mut self) -> usize {
        self.retain_unmatched(|entry| entry.is::<C>())
    }

    /// Remove every entry whose type is named `name`.
    ///
    /// A name registered in `registry` resolves to the registered type, so the
    /// alias and the type remove the same entries.
    pub fn pop_named(&mut self, name: &str, registry: &CriterionRegistry<M>) -> usize {
        let mut types: Vec<TypeId> = registry.type_of(name).into_iter().collect();
        types.extend(
            self.entries
                .iter()
                .filter(|entry| entry.is_named(name))
                .map(|entry| entry.type_id),
        );
        self.retain_unmatched(|entry| types.contains(&entry.type_id))
    }

    fn retain_unmatched(&mut self, matches: impl Fn(&CriterionEntry<M>) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !matches(entry));
        before - self.entries.len()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn all(&self) -> &[CriterionEntry<M>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<M: Entity> Default for CriteriaSet<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Entity> fmt::Debug for CriteriaSet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

fn short_name(type_name: &'static str) -> &'static str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::query::Query;
    use crate::repository::Repository;

    type Row = serde_json::Map<String, Value>;

    struct Active;

    impl Criterion<Row> for Active {
        fn apply(&self, query: Query, _repository: &Repository<Row>) -> Query {
            query.where_eq("active", true)
        }
    }

    struct Limited(u64);

    impl Criterion<Row> for Limited {
        fn apply(&self, query: Query, _repository: &Repository<Row>) -> Query {
            query.limit(self.0)
        }
    }

    #[test]
    fn pop_removes_every_entry_of_the_type() {
        let mut set = CriteriaSet::<Row>::new();
        set.push(Active);
        set.push(Limited(5));
        set.push(Active);

        assert_eq!(set.pop(&Active), 2);
        assert_eq!(set.len(), 1);
        assert!(set.all()[0].is::<Limited>());
    }

    #[test]
    fn pop_ignores_instance_parameters() {
        let mut set = CriteriaSet::<Row>::new();
        set.push(Limited(5));
        set.push(Limited(10));

        assert_eq!(set.pop(&Limited(99)), 2);
        assert!(set.is_empty());
    }

    #[test]
    fn pop_named_matches_short_and_full_type_names() {
        let registry = CriterionRegistry::new();
        let mut set = CriteriaSet::<Row>::new();
        set.push(Active);
        set.push(Limited(1));
        assert_eq!(set.pop_named("Active", &registry), 1);

        set.push(Active);
        assert_eq!(set.pop_named(type_name::<Active>(), &registry), 1);
        assert_eq!(set.pop_named("Missing", &registry), 0);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn reset_clears_and_all_preserves_order() {
        let mut set = CriteriaSet::<Row>::new();
        set.push(Limited(1));
        set.push(Active);
        let names: Vec<&str> = set.all().iter().map(|entry| short_name(entry.type_name())).collect();
        assert_eq!(names, vec!["Limited", "Active"]);

        set.reset();
        assert!(set.is_empty());
    }

    #[test]
    fn short_name_strips_paths_and_generics() {
        assert_eq!(short_name("quarry::criteria::WhereEquals"), "WhereEquals");
        assert_eq!(short_name("a::Wrapper<b::Inner>"), "Wrapper");
    }
}
