use std::fmt;

use crate::query::Query;

type ScopeFn = dyn Fn(Query) -> Query + Send + Sync;

/// A single caller-supplied query transform applied after criteria.
#[derive(Default)]
pub struct ScopeHook {
    hook: Option<Box<ScopeFn>>,
}

impl ScopeHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `scope`, replacing any previous one.
    pub fn set<F>(&mut self, scope: F)
    where
        F: Fn(Query) -> Query + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(scope));
    }

    pub fn clear(&mut self) {
        self.hook = None;
    }

    pub fn is_set(&self) -> bool {
        self.hook.is_some()
    }

    /// Run the hook over `query`, or hand it back untouched when unset.
    pub fn apply(&self, query: Query) -> Query {
        match &self.hook {
            Some(hook) => hook(query),
            None => query,
        }
    }
}

impl fmt::Debug for ScopeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeHook")
            .field("set", &self.is_set())
            .finish()
    }
}
