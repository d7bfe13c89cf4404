//! Per-repository cache key registry.
//!
//! Cacheable reads register the keys they store under the emitting
//! repository, so the invalidator can find and evict them after a mutation.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::events::RepositoryId;
use crate::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::registry";

/// Tracks repository → issued cache keys.
#[derive(Debug, Default)]
pub struct CacheKeyRegistry {
    keys: RwLock<HashMap<RepositoryId, BTreeSet<String>>>,
}

impl CacheKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, repository: &RepositoryId, key: impl Into<String>) {
        rw_write(&self.keys, SOURCE, "register")
            .entry(repository.clone())
            .or_default()
            .insert(key.into());
    }

    /// Keys issued for `repository`, in sorted order.
    pub fn keys_for(&self, repository: &RepositoryId) -> Vec<String> {
        rw_read(&self.keys, SOURCE, "keys_for")
            .get(repository)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop one key; the repository entry goes away with its last key.
    pub fn unregister(&self, repository: &RepositoryId, key: &str) {
        let mut keys = rw_write(&self.keys, SOURCE, "unregister");
        if let Some(issued) = keys.get_mut(repository) {
            issued.remove(key);
            if issued.is_empty() {
                keys.remove(repository);
            }
        }
    }

    /// Keep only the keys of `repository` for which `keep` answers `true`;
    /// returns how many were dropped.
    pub fn retain(&self, repository: &RepositoryId, mut keep: impl FnMut(&str) -> bool) -> usize {
        let mut keys = rw_write(&self.keys, SOURCE, "retain");
        let Some(issued) = keys.get_mut(repository) else {
            return 0;
        };
        let before = issued.len();
        issued.retain(|key| keep(key));
        let dropped = before - issued.len();
        if issued.is_empty() {
            keys.remove(repository);
        }
        dropped
    }

    pub fn clear(&self) {
        rw_write(&self.keys, SOURCE, "clear").clear();
    }

    pub fn repository_count(&self) -> usize {
        rw_read(&self.keys, SOURCE, "repository_count").len()
    }

    pub fn key_count(&self) -> usize {
        rw_read(&self.keys, SOURCE, "key_count")
            .values()
            .map(BTreeSet::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let registry = CacheKeyRegistry::new();
        let posts = RepositoryId::new("posts");
        let users = RepositoryId::new("users");

        registry.register(&posts, "posts@all-b");
        registry.register(&posts, "posts@all-a");
        registry.register(&posts, "posts@all-a");
        registry.register(&users, "users@find-c");

        assert_eq!(registry.keys_for(&posts), vec!["posts@all-a", "posts@all-b"]);
        assert_eq!(registry.key_count(), 3);
        assert_eq!(registry.repository_count(), 2);
    }

    #[test]
    fn unregister_removes_empty_repositories() {
        let registry = CacheKeyRegistry::new();
        let posts = RepositoryId::new("posts");
        registry.register(&posts, "posts@all-a");

        registry.unregister(&posts, "posts@all-a");
        registry.unregister(&posts, "missing");

        assert!(registry.keys_for(&posts).is_empty());
        assert_eq!(registry.repository_count(), 0);
    }

    #[test]
    fn unknown_repository_has_no_keys() {
        let registry = CacheKeyRegistry::new();
        assert!(registry.keys_for(&RepositoryId::new("ghost")).is_empty());
    }

    #[test]
    fn retain_drops_rejected_keys() {
        let registry = CacheKeyRegistry::new();
        let posts = RepositoryId::new("posts");
        for key in ["posts@find-a", "posts@find-b", "posts@all-c"] {
            registry.register(&posts, key);
        }

        let dropped = registry.retain(&posts, |key| key.starts_with("posts@all"));
        assert_eq!(dropped, 2);
        assert_eq!(registry.keys_for(&posts), vec!["posts@all-c"]);

        assert_eq!(registry.retain(&posts, |_| false), 1);
        assert_eq!(registry.repository_count(), 0);
        assert_eq!(registry.retain(&RepositoryId::new("ghost"), |_| false), 0);
    }

    #[test]
    fn clear_removes_everything() {
        let registry = CacheKeyRegistry::new();
        registry.register(&RepositoryId::new("posts"), "k");
        registry.clear();
        assert_eq!(registry.key_count(), 0);
    }
}
