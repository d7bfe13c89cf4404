//! Query-string view of the request a repository session serves.

use serde::Serialize;
use url::form_urlencoded;

/// The current request's path and query parameters, in arrival order.
///
/// Sessions read `page`, sort and cache-bypass parameters from it; pagination
/// results carry the parameters forward into their links.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestContext {
    path: String,
    params: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Parse a raw query string such as `page=2&sort[title]=desc`.
    pub fn from_query_string(path: impl Into<String>, query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self {
            path: path.into(),
            params: form_urlencoded::parse(query.as_bytes())
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// First value for `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn has(&self, key: &str) -> bool {
        self.param(key).is_some()
    }

    /// Whether `key` is present with a value other than `0`, `false` or `off`.
    /// A bare `?skipCache` counts as set.
    pub fn flag(&self, key: &str) -> bool {
        self.param(key).is_some_and(|value| {
            !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            )
        })
    }

    /// One-based page number; anything missing or unparsable is page 1.
    pub fn page(&self) -> u64 {
        self.param("page")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|page| *page > 0)
            .unwrap_or(1)
    }

    /// `name[key]=value` pairs, in arrival order.
    pub fn indexed(&self, name: &str) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(key, value)| {
                let inner = key.strip_prefix(name)?.strip_prefix('[')?.strip_suffix(']')?;
                (!inner.is_empty()).then(|| (inner.to_string(), value.clone()))
            })
            .collect()
    }

    /// Parameters other than `key`, for building links that replace it.
    pub(crate) fn params_without<'a>(
        &'a self,
        key: &'a str,
    ) -> impl Iterator<Item = &'a (String, String)> + 'a {
        self.params.iter().filter(move |(name, _)| name != key)
    }
}
