//! Scraper lifecycle: groups of URLs, extraction callbacks, merged result.
//!
//! ```text
//! Scraper::new(backend)
//!   .set_global_headers(..)
//!   .register_group("id", url_source)   → Group
//!       .scrape(callback) ...
//! scraper.run()  → for each group, for each URL:
//!                    prepare_document → callbacks → deep-merge into result
//! ```

use crate::backend::{Backend, Headers, merge_headers};
use crate::merge::{self, ResultMap};
use crate::utils::ellipsize;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

// ── URL sources ───────────────────────────────────────────────────────────────

/// Where a group's pages come from.
pub enum UrlSource {
    /// One page, visited once.
    Fixed(String),
    /// Pages produced lazily until the iterator is exhausted.
    Pages(Box<dyn Iterator<Item = String> + Send>),
}

impl UrlSource {
    pub fn fixed(url: impl Into<String>) -> Self {
        UrlSource::Fixed(url.into())
    }

    pub fn pages<I>(urls: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String> + 'static,
        I::IntoIter: Send + 'static,
    {
        UrlSource::Pages(Box::new(urls.into_iter().map(Into::into)))
    }

    /// Pages from a resolver called until it returns `None`.
    pub fn from_fn<F>(next_url: F) -> Self
    where
        F: FnMut() -> Option<String> + Send + 'static,
    {
        UrlSource::Pages(Box::new(std::iter::from_fn(next_url)))
    }
}

impl From<&str> for UrlSource {
    fn from(url: &str) -> Self {
        UrlSource::fixed(url)
    }
}

impl From<String> for UrlSource {
    fn from(url: String) -> Self {
        UrlSource::Fixed(url)
    }
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlSource::Fixed(url) => f.debug_tuple("Fixed").field(url).finish(),
            UrlSource::Pages(_) => f.write_str("Pages(..)"),
        }
    }
}

// ── Page context ──────────────────────────────────────────────────────────────

/// What an extraction callback sees: the freshly loaded page.
pub struct Page<'a, B: Backend> {
    group_id: &'a str,
    url: &'a str,
    backend: &'a B,
}

impl<'a, B: Backend> Page<'a, B> {
    pub fn group_id(&self) -> &str {
        self.group_id
    }

    pub fn url(&self) -> &str {
        self.url
    }

    /// The backend, for backend-specific extras (waits, clicks, cookies).
    pub fn backend(&self) -> &B {
        self.backend
    }

    pub async fn query_all(&self, path: &str) -> Vec<B::Element> {
        self.backend.query_all(path).await
    }

    pub async fn query_single(&self, path: &str) -> B::Element {
        let el = self.backend.query_single(path).await;
        if crate::document::Element::is_absent(&el) {
            info!("[{}] Could not find element for {:?}", self.group_id, path);
        }
        el
    }
}

/// Boxed future returned by an extraction callback.
/// `Ok(None)` means the page contributed nothing.
pub type ScrapeFuture<'a> = BoxFuture<'a, Result<Option<Value>>>;

pub type ScrapeFn<B> = Box<dyn for<'a> Fn(&'a Page<'a, B>) -> ScrapeFuture<'a> + Send + Sync>;

// ── Group ─────────────────────────────────────────────────────────────────────

/// One logical target: a URL source, extra headers, and callbacks.
pub struct Group<B: Backend> {
    id: String,
    source: UrlSource,
    headers: Headers,
    callbacks: Vec<ScrapeFn<B>>,
}

impl<B: Backend> Group<B> {
    pub fn new(id: impl Into<String>, source: impl Into<UrlSource>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            headers: Headers::new(),
            callbacks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Header sent only for this group's pages; wins over global headers.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let (name, value): (String, String) = (name.into(), value.into());
        merge_headers(&mut self.headers, [(name, value)]);
        self
    }

    pub fn headers(&mut self, headers: Headers) -> &mut Self {
        merge_headers(&mut self.headers, headers);
        self
    }

    /// Add an extraction callback, run against every page of this group.
    pub fn scrape<F>(&mut self, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a Page<'a, B>) -> ScrapeFuture<'a> + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
        self
    }
}

impl<B: Backend> fmt::Debug for Group<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

// ── Scraper ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pages_visited: usize,
    /// Paginated URLs identical to the one just visited.
    pub repeated_urls: usize,
}

/// Owns one backend session, its groups, and the accumulating result.
pub struct Scraper<B: Backend> {
    backend: B,
    headers: Headers,
    groups: Vec<Group<B>>,
    result: ResultMap,
    stats: RunStats,
}

impl<B: Backend> Scraper<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            headers: Headers::new(),
            groups: Vec::new(),
            result: ResultMap::new(),
            stats: RunStats::default(),
        }
    }

    /// Headers sent with every page, merged under each group's own headers.
    /// Backends that cannot send headers only log a warning.
    pub fn set_global_headers(&mut self, headers: Headers) -> &mut Self {
        if !self.backend.supports_headers() {
            warn!(
                "Global headers are not supported by this backend; ignoring {} header(s)",
                headers.len()
            );
            return self;
        }
        self.headers = Headers::new();
        merge_headers(&mut self.headers, headers);
        self
    }

    /// Append a new group; groups run in registration order.
    pub fn register_group(
        &mut self,
        id: impl Into<String>,
        source: impl Into<UrlSource>,
    ) -> &mut Group<B> {
        self.add_group(Group::new(id, source))
    }

    pub fn add_group(&mut self, group: Group<B>) -> &mut Group<B> {
        self.groups.push(group);
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    /// Add headers to an already registered group. Returns false when no
    /// group has that id.
    pub fn group_headers(&mut self, id: &str, headers: Headers) -> bool {
        match self.groups.iter_mut().find(|g| g.id == id) {
            Some(group) => {
                group.headers(headers);
                true
            }
            None => {
                warn!("No group registered as {:?}", id);
                false
            }
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Query the page loaded last.
    pub async fn query_all(&self, path: &str) -> Vec<B::Element> {
        self.backend.query_all(path).await
    }

    pub async fn query_single(&self, path: &str) -> B::Element {
        let el = self.backend.query_single(path).await;
        if crate::document::Element::is_absent(&el) {
            info!("Could not find element for {:?}", path);
        }
        el
    }

    /// Append under `key`; see [`merge::append_entry`] for the rules.
    pub fn append_result(&mut self, key: &str, value: Value) -> Result<&mut Self> {
        merge::append_entry(&mut self.result, key, value)
            .with_context(|| format!("append_result({})", key))?;
        Ok(self)
    }

    /// Overwrite `key`.
    pub fn set_result(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.result.insert(key.into(), value);
        self
    }

    pub fn result(&self) -> &ResultMap {
        &self.result
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Visit every group in order and hand back the merged result.
    ///
    /// Groups are consumed; a second call has nothing left to visit.
    pub async fn run(&mut self) -> Result<ResultMap> {
        let groups = std::mem::take(&mut self.groups);
        for group in groups {
            self.run_group(group).await?;
        }
        Ok(std::mem::take(&mut self.result))
    }

    async fn run_group(&mut self, group: Group<B>) -> Result<()> {
        let Group {
            id,
            source,
            headers,
            callbacks,
        } = group;

        let mut merged = self.headers.clone();
        merge_headers(&mut merged, headers);

        match source {
            UrlSource::Fixed(url) => self.visit(&id, &url, &merged, &callbacks).await,
            UrlSource::Pages(urls) => {
                let mut previous: Option<String> = None;
                for url in urls {
                    if previous.as_deref() == Some(url.as_str()) {
                        warn!("[{}] Next URL is the same as the current one: {}", id, url);
                        self.stats.repeated_urls += 1;
                    }
                    self.visit(&id, &url, &merged, &callbacks).await?;
                    previous = Some(url);
                }
                Ok(())
            }
        }
    }

    async fn visit(
        &mut self,
        group_id: &str,
        url: &str,
        headers: &Headers,
        callbacks: &[ScrapeFn<B>],
    ) -> Result<()> {
        self.backend
            .prepare_document(url, headers)
            .await
            .with_context(|| format!("[{}] failed to load {}", group_id, url))?;
        self.stats.pages_visited += 1;
        info!("[{}] Extracting data from {}", group_id, ellipsize(url, 120));

        let page = Page {
            group_id,
            url,
            backend: &self.backend,
        };
        for callback in callbacks {
            let partial = callback(&page)
                .await
                .with_context(|| format!("[{}] extraction failed on {}", group_id, url))?;
            if let Some(partial) = partial {
                merge::merge_partial(&mut self.result, partial)
                    .with_context(|| format!("[{}] merging result of {}", group_id, url))?;
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
