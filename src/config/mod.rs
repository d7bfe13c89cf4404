//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CliArgs, Command, CountArgs, FindArgs, ListArgs, PaginateArgs, SettingsOverrides, TableArgs,
};

use std::num::{NonZeroU32, NonZeroU64, NonZeroUsize};
use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quarry";
const ENV_PREFIX: &str = "QUARRY";
const DEFAULT_PAGINATION_LIMIT: u64 = 15;
const DEFAULT_CACHE_MINUTES: u64 = 30;
const DEFAULT_CACHE_REPOSITORY: &str = "memory";
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_SKIP_CACHE_PARAM: &str = "skipCache";
const DEFAULT_SORT_PARAM: &str = "sort";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub pagination: PaginationSettings,
    pub cache: CacheSettings,
    pub sort: SortSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone)]
pub struct PaginationSettings {
    pub limit: NonZeroU64,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        Self {
            limit: NonZeroU64::new(DEFAULT_PAGINATION_LIMIT).unwrap_or(NonZeroU64::MIN),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub minutes: u64,
    /// Name of the cache store reads are kept in.
    pub repository: String,
    pub capacity: NonZeroUsize,
    pub clean: CacheCleanSettings,
    pub allowed: CacheAllowedSettings,
    /// Request parameter that bypasses the cache for one read.
    pub skip_cache_param: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            minutes: DEFAULT_CACHE_MINUTES,
            repository: DEFAULT_CACHE_REPOSITORY.to_string(),
            capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            clean: CacheCleanSettings::default(),
            allowed: CacheAllowedSettings::default(),
            skip_cache_param: DEFAULT_SKIP_CACHE_PARAM.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheCleanSettings {
    pub enabled: bool,
    pub on_created: bool,
    pub on_updated: bool,
    pub on_deleted: bool,
}

impl Default for CacheCleanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            on_created: true,
            on_updated: true,
            on_deleted: true,
        }
    }
}

/// Method filters for cacheable reads. `only` takes precedence over `except`.
#[derive(Debug, Clone, Default)]
pub struct CacheAllowedSettings {
    pub only: Option<Vec<String>>,
    pub except: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SortSettings {
    pub param: String,
}

impl Default for SortSettings {
    fn default() -> Self {
        Self {
            param: DEFAULT_SORT_PARAM.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: NonZeroU32::new(DEFAULT_DB_MAX_CONNECTIONS)
                .unwrap_or(NonZeroU32::MIN),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.allowed.only")
            .with_list_parse_key("cache.allowed.except")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    pagination: RawPaginationSettings,
    cache: RawCacheSettings,
    sort: RawSortSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(count) = overrides.database_max_connections {
            self.database.max_connections = Some(count);
        }
        if let Some(limit) = overrides.pagination_limit {
            self.pagination.limit = Some(limit);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(minutes) = overrides.cache_minutes {
            self.cache.minutes = Some(minutes);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            pagination: build_pagination_settings(raw.pagination)?,
            cache: build_cache_settings(raw.cache)?,
            sort: build_sort_settings(raw.sort)?,
            logging: build_logging_settings(raw.logging)?,
            database: build_database_settings(raw.database)?,
        })
    }
}

fn build_pagination_settings(
    pagination: RawPaginationSettings,
) -> Result<PaginationSettings, LoadError> {
    let limit = pagination.limit.unwrap_or(DEFAULT_PAGINATION_LIMIT);
    let limit = NonZeroU64::new(limit)
        .ok_or_else(|| LoadError::invalid("pagination.limit", "must be greater than zero"))?;
    Ok(PaginationSettings { limit })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let repository = non_blank(cache.repository, DEFAULT_CACHE_REPOSITORY);
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    let capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.capacity", "must be greater than zero"))?;
    let skip_cache_param = non_blank(cache.params.skip_cache, DEFAULT_SKIP_CACHE_PARAM);

    let clean = CacheCleanSettings {
        enabled: cache.clean.enabled.unwrap_or(true),
        on_created: cache.clean.on.created.unwrap_or(true),
        on_updated: cache.clean.on.updated.unwrap_or(true),
        on_deleted: cache.clean.on.deleted.unwrap_or(true),
    };

    let allowed = CacheAllowedSettings {
        only: method_list(cache.allowed.only),
        except: method_list(cache.allowed.except),
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        minutes: cache.minutes.unwrap_or(DEFAULT_CACHE_MINUTES),
        repository,
        capacity,
        clean,
        allowed,
        skip_cache_param,
    })
}

fn build_sort_settings(sort: RawSortSettings) -> Result<SortSettings, LoadError> {
    Ok(SortSettings {
        param: non_blank(sort.param, DEFAULT_SORT_PARAM),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = NonZeroU32::new(max_connections)
        .ok_or_else(|| LoadError::invalid("database.max_connections", "must be greater than zero"))?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPaginationSettings {
    limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    minutes: Option<u64>,
    repository: Option<String>,
    capacity: Option<usize>,
    clean: RawCacheCleanSettings,
    allowed: RawCacheAllowedSettings,
    params: RawCacheParams,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheCleanSettings {
    enabled: Option<bool>,
    on: RawCacheCleanActions,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheCleanActions {
    created: Option<bool>,
    updated: Option<bool>,
    deleted: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheAllowedSettings {
    only: Option<Vec<String>>,
    except: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheParams {
    skip_cache: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSortSettings {
    param: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

fn non_blank(value: Option<String>, default: &str) -> String {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Trimmed, non-empty method names; an empty list means unset.
fn method_list(methods: Option<Vec<String>>) -> Option<Vec<String>> {
    let methods: Vec<String> = methods?
        .into_iter()
        .map(|method| method.trim().to_string())
        .filter(|method| !method.is_empty())
        .collect();
    (!methods.is_empty()).then_some(methods)
}
