pub mod browser;
pub mod http;

use crate::document::Element;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

pub use self::browser::{BrowserBackend, BrowserElement, BrowserFamily, BrowserOptions};
pub use self::http::HttpBackend;

/// Request headers keyed by lowercased name.
pub type Headers = HashMap<String, String>;

/// Insert `headers` into `into`. Names are compared case-insensitively, so
/// `Accept` replaces an earlier `accept`.
pub fn merge_headers<I, K, V>(into: &mut Headers, headers: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    for (name, value) in headers {
        into.insert(name.as_ref().trim().to_ascii_lowercase(), value.into());
    }
}

// ── Backend trait ─────────────────────────────────────────────────────────────

/// A fetch mechanism: loads one document at a time and answers queries
/// against whatever it loaded last.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Element: Element + 'static;

    /// Load `url`, replacing the current document.
    async fn prepare_document(&mut self, url: &str, headers: &Headers) -> Result<()>;

    async fn query_all(&self, path: &str) -> Vec<Self::Element>;

    /// First match in the current document, or an absent element.
    async fn query_single(&self, path: &str) -> Self::Element;

    /// Whether request headers reach the wire.
    fn supports_headers(&self) -> bool {
        true
    }
}
