use super::Element;
use async_trait::async_trait;
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Compile a CSS selector; a bad selector is logged and treated as "no match".
pub fn parse_selector(path: &str) -> Option<Selector> {
    match Selector::parse(path) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!("Invalid selector {:?}: {:?}", path, e);
            None
        }
    }
}

// ── Document ──────────────────────────────────────────────────────────────────

/// A parsed HTML page, shared by every element handle taken from it.
#[derive(Clone)]
pub struct HtmlDocument {
    inner: Arc<Mutex<Html>>,
}

impl fmt::Debug for HtmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HtmlDocument").finish_non_exhaustive()
    }
}

impl HtmlDocument {
    pub fn parse(body: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Html::parse_document(body))),
        }
    }

    fn with_html<R>(&self, f: impl FnOnce(&Html) -> R) -> Option<R> {
        let html = self.inner.lock().ok()?;
        Some(f(&html))
    }

    fn element(&self, id: NodeId) -> HtmlElement {
        HtmlElement {
            node: Some((self.clone(), id)),
        }
    }

    pub fn select(&self, path: &str) -> Vec<HtmlElement> {
        let Some(sel) = parse_selector(path) else {
            return vec![];
        };
        let ids: Vec<NodeId> = self
            .with_html(|h| h.select(&sel).map(|e| e.id()).collect())
            .unwrap_or_default();
        ids.into_iter().map(|id| self.element(id)).collect()
    }

    pub fn select_first(&self, path: &str) -> HtmlElement {
        let Some(sel) = parse_selector(path) else {
            return HtmlElement::absent();
        };
        self.with_html(|h| h.select(&sel).next().map(|e| e.id()))
            .flatten()
            .map(|id| self.element(id))
            .unwrap_or_else(HtmlElement::absent)
    }
}

// ── Element ───────────────────────────────────────────────────────────────────

/// Handle to one node of an [`HtmlDocument`].
///
/// Text is the concatenated text content of every descendant, hidden or
/// not, since nothing is rendered.
#[derive(Clone, Debug, Default)]
pub struct HtmlElement {
    node: Option<(HtmlDocument, NodeId)>,
}

impl HtmlElement {
    pub fn absent() -> Self {
        Self { node: None }
    }

    fn with_node<R>(&self, f: impl FnOnce(ElementRef<'_>) -> R) -> Option<R> {
        let (doc, id) = self.node.as_ref()?;
        doc.with_html(|h| h.tree.get(*id).and_then(ElementRef::wrap).map(f))
            .flatten()
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.with_node(|e| e.value().attr(name).map(|v| v.trim().to_string()))
            .flatten()
    }

    pub fn text_content(&self) -> Option<String> {
        self.with_node(|e| e.text().collect::<String>().trim().to_string())
    }

    pub fn outer_html(&self) -> Option<String> {
        self.with_node(|e| e.html())
    }

    pub fn select(&self, path: &str) -> Vec<HtmlElement> {
        let Some((doc, _)) = self.node.as_ref() else {
            return vec![];
        };
        let Some(sel) = parse_selector(path) else {
            return vec![];
        };
        let ids: Vec<NodeId> = self
            .with_node(|e| e.select(&sel).map(|c| c.id()).collect())
            .unwrap_or_default();
        ids.into_iter().map(|id| doc.element(id)).collect()
    }

    pub fn select_first(&self, path: &str) -> HtmlElement {
        let Some((doc, _)) = self.node.as_ref() else {
            return HtmlElement::absent();
        };
        let Some(sel) = parse_selector(path) else {
            return HtmlElement::absent();
        };
        self.with_node(|e| e.select(&sel).next().map(|c| c.id()))
            .flatten()
            .map(|id| doc.element(id))
            .unwrap_or_else(HtmlElement::absent)
    }
}

#[async_trait]
impl Element for HtmlElement {
    async fn attribute(&self, name: &str) -> Option<String> {
        self.attr(name)
    }

    async fn text(&self) -> Option<String> {
        self.text_content()
    }

    async fn html(&self) -> Option<String> {
        self.outer_html()
    }

    async fn query_all(&self, path: &str) -> Vec<Self> {
        self.select(path)
    }

    async fn query_single(&self, path: &str) -> Self {
        self.select_first(path)
    }

    fn is_absent(&self) -> bool {
        self.node.is_none()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
