use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::RepositoryError;
use crate::model::Entity;

use super::{Criterion, CriterionEntry};

type Factory<M> = Arc<dyn Fn() -> CriterionEntry<M> + Send + Sync>;

/// Named criterion factories, so sessions can push criteria by name.
pub struct CriterionRegistry<M: Entity> {
    factories: HashMap<String, (TypeId, Factory<M>)>,
}

impl<M: Entity> CriterionRegistry<M> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register `factory` under `name`; a later registration replaces an earlier one.
    pub fn register<C, F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        C: Criterion<M>,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let name = name.into();
        let alias = name.clone();
        let build: Factory<M> =
            Arc::new(move || CriterionEntry::new(factory()).with_alias(alias.clone()));
        self.factories.insert(name, (TypeId::of::<C>(), build));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub(crate) fn type_of(&self, name: &str) -> Option<TypeId> {
        self.factories.get(name).map(|(type_id, _)| *type_id)
    }

    pub(crate) fn instantiate(&self, name: &str) -> Result<CriterionEntry<M>, RepositoryError> {
        self.factories
            .get(name)
            .map(|(_, factory)| factory())
            .ok_or_else(|| {
                RepositoryError::configuration(format!("no criterion is registered as `{name}`"))
            })
    }
}

impl<M: Entity> Default for CriterionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Entity> fmt::Debug for CriterionRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("CriterionRegistry")
            .field("names", &names)
            .finish()
    }
}
