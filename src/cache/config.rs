//! Runtime view of the `[cache]` settings.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::CacheSettings;
use crate::events::RepositoryAction;

/// Cache behaviour shared by repository sessions and the invalidator.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve cacheable reads from the store.
    pub enabled: bool,
    /// Lifetime of a cached read.
    pub ttl: Duration,
    /// Maximum entries held by the in-memory store.
    pub capacity: NonZeroUsize,
    /// Evict keys on `*-ed` lifecycle events.
    pub clean_enabled: bool,
    pub clean_on_created: bool,
    pub clean_on_updated: bool,
    pub clean_on_deleted: bool,
    /// When set, only these methods are cached.
    pub only: Option<Vec<String>>,
    /// When `only` is unset, these methods are never cached.
    pub except: Option<Vec<String>>,
    /// Request parameter that bypasses the cache.
    pub skip_param: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: Duration::from_secs(settings.minutes.saturating_mul(60)),
            capacity: settings.capacity,
            clean_enabled: settings.clean.enabled,
            clean_on_created: settings.clean.on_created,
            clean_on_updated: settings.clean.on_updated,
            clean_on_deleted: settings.clean.on_deleted,
            only: settings.allowed.only.clone(),
            except: settings.allowed.except.clone(),
            skip_param: settings.skip_cache_param.clone(),
        }
    }
}

impl CacheConfig {
    /// Whether reads through `method` may be cached.
    pub fn allows(&self, method: &str) -> bool {
        if let Some(only) = &self.only {
            return only.iter().any(|allowed| allowed == method);
        }
        if let Some(except) = &self.except {
            return !except.iter().any(|excluded| excluded == method);
        }
        true
    }

    /// Whether `action` should evict the emitting repository's keys.
    pub fn cleans_on(&self, action: RepositoryAction) -> bool {
        if !self.clean_enabled {
            return false;
        }
        match action {
            RepositoryAction::Created => self.clean_on_created,
            RepositoryAction::Updated => self.clean_on_updated,
            RepositoryAction::Deleted => self.clean_on_deleted,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.ttl, Duration::from_secs(30 * 60));
        assert_eq!(config.capacity.get(), 1024);
        assert_eq!(config.skip_param, "skipCache");
        assert!(config.allows("find"));
    }

    #[test]
    fn only_takes_precedence_over_except() {
        let config = CacheConfig {
            only: Some(vec!["all".into()]),
            except: Some(vec!["all".into()]),
            ..Default::default()
        };
        assert!(config.allows("all"));
        assert!(!config.allows("find"));
    }

    #[test]
    fn except_excludes_listed_methods() {
        let config = CacheConfig {
            except: Some(vec!["paginate".into()]),
            ..Default::default()
        };
        assert!(!config.allows("paginate"));
        assert!(config.allows("all"));
    }

    #[test]
    fn cleaning_follows_per_action_switches() {
        let config = CacheConfig {
            clean_on_created: false,
            ..Default::default()
        };
        assert!(!config.cleans_on(RepositoryAction::Created));
        assert!(config.cleans_on(RepositoryAction::Updated));
        assert!(!config.cleans_on(RepositoryAction::Deleting));
    }

    #[test]
    fn disabled_cleaning_overrides_actions() {
        let config = CacheConfig {
            clean_enabled: false,
            ..Default::default()
        };
        for action in RepositoryAction::COMPLETED {
            assert!(!config.cleans_on(action));
        }
    }
}
