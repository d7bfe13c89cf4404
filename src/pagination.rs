//! Offset pagination results.

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::request::RequestContext;

/// One page of rows plus the request parameters its links carry forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub per_page: u64,
    pub current_page: u64,
    /// Total matching rows; `None` for simple pagination.
    pub total: Option<u64>,
    pub has_more: bool,
    pub path: String,
    /// Query parameters appended to every generated link.
    pub appends: Vec<(String, String)>,
}

impl<T> Page<T> {
    /// A page that knows the total row count.
    pub fn length_aware(
        items: Vec<T>,
        total: u64,
        per_page: u64,
        current_page: u64,
        request: &RequestContext,
    ) -> Self {
        let has_more = current_page.saturating_mul(per_page) < total;
        Self::build(items, Some(total), per_page, current_page, has_more, request)
    }

    /// A page that only knows whether another page follows.
    pub fn simple(
        items: Vec<T>,
        per_page: u64,
        current_page: u64,
        has_more: bool,
        request: &RequestContext,
    ) -> Self {
        Self::build(items, None, per_page, current_page, has_more, request)
    }

    fn build(
        items: Vec<T>,
        total: Option<u64>,
        per_page: u64,
        current_page: u64,
        has_more: bool,
        request: &RequestContext,
    ) -> Self {
        Self {
            items,
            per_page,
            current_page,
            total,
            has_more,
            path: request.path().to_string(),
            appends: request.params_without("page").cloned().collect(),
        }
    }

    pub fn last_page(&self) -> Option<u64> {
        self.total
            .map(|total| total.div_ceil(self.per_page.max(1)).max(1))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Link to `page`, keeping every appended parameter.
    pub fn url(&self, page: u64) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.appends {
            query.append_pair(key, value);
        }
        query.append_pair("page", &page.max(1).to_string());
        format!("{}?{}", self.path, query.finish())
    }

    pub fn next_page_url(&self) -> Option<String> {
        self.has_more.then(|| self.url(self.current_page + 1))
    }

    pub fn previous_page_url(&self) -> Option<String> {
        (self.current_page > 1).then(|| self.url(self.current_page - 1))
    }

    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            per_page: self.per_page,
            current_page: self.current_page,
            total: self.total,
            has_more: self.has_more,
            path: self.path,
            appends: self.appends,
        }
    }

    /// Like [`Page::map`], stopping at the first failing item.
    pub fn try_map<U, E, F>(self, f: F) -> Result<Page<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        let items = self.items.into_iter().map(f).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            per_page: self.per_page,
            current_page: self.current_page,
            total: self.total,
            has_more: self.has_more,
            path: self.path,
            appends: self.appends,
        })
    }
}
