//! Live-browser backend over the Chrome DevTools protocol (chromiumoxide).
//!
//! Pages are rendered, so element text is the visible `innerText` rather
//! than raw text content. Request headers cannot be injected here.

use super::{Backend, Headers};
use crate::document::Element;
use crate::error::ScrapeError;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLICK_JS: &str = "function() { this.click(); }";

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Chromium,
}

impl FromStr for BrowserFamily {
    type Err = ScrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chrome" | "chromium" | "google-chrome" => Ok(BrowserFamily::Chromium),
            other => Err(ScrapeError::UnsupportedBrowser(other.to_string())),
        }
    }
}

/// Browser launch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserOptions {
    #[serde(default = "default_family")]
    pub family: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Browser executable; auto-detected when unset.
    #[serde(default)]
    pub binary_path: Option<PathBuf>,

    #[serde(default)]
    pub user_agent: Option<String>,

    /// `host:port`, used for both http and https.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Raw engine flags, passed as `key=value` (or bare `key` when empty).
    #[serde(default)]
    pub extra_args: HashMap<String, String>,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,
}

fn default_family() -> String {
    "chrome".to_string()
}
fn default_true() -> bool {
    true
}
fn default_navigation_timeout_secs() -> u64 {
    30
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            family: default_family(),
            headless: true,
            binary_path: None,
            user_agent: None,
            proxy: None,
            extra_args: HashMap::new(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
        }
    }
}

impl BrowserOptions {
    /// Command-line flags handed to the browser process.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ua) = &self.user_agent {
            args.push(format!("--user-agent={}", ua));
        }
        if let Some(proxy) = &self.proxy {
            args.push(format!("--proxy-server={}", proxy));
        }
        if self.headless {
            args.push("--no-sandbox".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--disable-gpu".to_string());
        }

        let mut extra: Vec<_> = self.extra_args.iter().collect();
        extra.sort();
        for (key, value) in extra {
            if value.is_empty() {
                args.push(key.clone());
            } else {
                args.push(format!("{}={}", key, value));
            }
        }
        args
    }
}

/// Poll `attempt` until it yields something or `wait` has elapsed.
/// A zero wait makes exactly one attempt.
async fn poll_until<T, F, Fut>(wait: Duration, mut attempt: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + wait;
    loop {
        if let Some(found) = attempt().await {
            return Some(found);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(POLL_INTERVAL).await;
    }
}

// ── Element ───────────────────────────────────────────────────────────────────

/// Handle to a live DOM node, or absent.
#[derive(Default)]
pub struct BrowserElement {
    inner: Option<chromiumoxide::Element>,
}

impl BrowserElement {
    pub fn absent() -> Self {
        Self { inner: None }
    }

    fn wrap(el: chromiumoxide::Element) -> Self {
        Self { inner: Some(el) }
    }

    /// Like `query_all`, but keeps polling for up to `wait` while nothing matches.
    pub async fn query_all_wait(&self, path: &str, wait: Duration) -> Vec<Self> {
        let Some(el) = &self.inner else {
            return vec![];
        };
        poll_until(wait, move || async move {
            match el.find_elements(path).await {
                Ok(found) if !found.is_empty() => Some(found),
                _ => None,
            }
        })
        .await
        .map(|found| found.into_iter().map(Self::wrap).collect())
        .unwrap_or_default()
    }

    /// Like `query_single`, but keeps polling for up to `wait`.
    pub async fn query_single_wait(&self, path: &str, wait: Duration) -> Self {
        let Some(el) = &self.inner else {
            return Self::absent();
        };
        poll_until(wait, move || async move { el.find_element(path).await.ok() })
            .await
            .map(Self::wrap)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Element for BrowserElement {
    async fn attribute(&self, name: &str) -> Option<String> {
        let el = self.inner.as_ref()?;
        el.attribute(name)
            .await
            .ok()
            .flatten()
            .map(|v| v.trim().to_string())
    }

    async fn text(&self) -> Option<String> {
        let el = self.inner.as_ref()?;
        el.inner_text()
            .await
            .ok()
            .flatten()
            .map(|v| v.trim().to_string())
    }

    async fn html(&self) -> Option<String> {
        let el = self.inner.as_ref()?;
        el.outer_html().await.ok().flatten()
    }

    async fn query_all(&self, path: &str) -> Vec<Self> {
        self.query_all_wait(path, Duration::ZERO).await
    }

    async fn query_single(&self, path: &str) -> Self {
        self.query_single_wait(path, Duration::ZERO).await
    }

    fn is_absent(&self) -> bool {
        self.inner.is_none()
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

pub struct BrowserBackend {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl BrowserBackend {
    /// Launch a browser process and open one blank tab.
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let family: BrowserFamily = options.family.parse()?;
        debug!("Launching {:?} browser", family);

        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.binary_path {
            builder = builder.chrome_executable(path);
        }
        for arg in options.launch_args() {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(ScrapeError::Init)
            .context("Failed to build browser config")?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Init(e.to_string()))
            .context("Failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open browser tab")?;

        info!("Browser launched (headless: {})", options.headless);
        Ok(Self {
            browser,
            page,
            handler,
            navigation_timeout: Duration::from_secs(options.navigation_timeout_secs),
        })
    }

    pub async fn query_all_wait(&self, path: &str, wait: Duration) -> Vec<BrowserElement> {
        poll_until(wait, move || async move {
            match self.page.find_elements(path).await {
                Ok(found) if !found.is_empty() => Some(found),
                _ => None,
            }
        })
        .await
        .map(|found| found.into_iter().map(BrowserElement::wrap).collect())
        .unwrap_or_default()
    }

    pub async fn query_single_wait(&self, path: &str, wait: Duration) -> BrowserElement {
        poll_until(wait, move || async move { self.page.find_element(path).await.ok() })
            .await
            .map(BrowserElement::wrap)
            .unwrap_or_default()
    }

    /// Wait until `path` resolves, then fire the element's `click()` in page
    /// script, so overlays on top of it do not swallow the click.
    /// Returns false when nothing showed up in time.
    pub async fn click(&self, path: &str, wait: Duration) -> bool {
        let clicked = poll_until(wait, move || async move {
            let el = self.page.find_element(path).await.ok()?;
            el.call_js_fn(CLICK_JS, false).await.ok().map(|_| ())
        })
        .await;

        if clicked.is_none() {
            debug!("Could not click element for {:?}", path);
        }
        clicked.is_some()
    }

    /// Current cookie jar as name → value.
    pub async fn cookies(&self) -> Result<HashMap<String, String>> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .context("Failed to read cookies")?;
        Ok(cookies.into_iter().map(|c| (c.name, c.value)).collect())
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await.context("Failed to close browser")?;
        self.handler.abort();
        Ok(())
    }
}

impl Drop for BrowserBackend {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Backend for BrowserBackend {
    type Element = BrowserElement;

    async fn prepare_document(&mut self, url: &str, _headers: &Headers) -> Result<()> {
        match timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => bail!("Navigation to {} failed: {}", url, e),
            Err(_) => bail!(
                "Navigation to {} timed out after {:?}",
                url,
                self.navigation_timeout
            ),
        }
    }

    async fn query_all(&self, path: &str) -> Vec<BrowserElement> {
        self.query_all_wait(path, Duration::ZERO).await
    }

    async fn query_single(&self, path: &str) -> BrowserElement {
        self.query_single_wait(path, Duration::ZERO).await
    }

    fn supports_headers(&self) -> bool {
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
