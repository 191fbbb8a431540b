use super::{Backend, Headers};
use crate::config::HttpConfig;
use crate::document::{HtmlDocument, HtmlElement};
use crate::error::ScrapeError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use tracing::debug;

/// Plain HTTP fetch + parsed HTML tree.
pub struct HttpBackend {
    inner: reqwest::Client,
    document: Option<HtmlDocument>,
}

impl HttpBackend {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .map_err(|e| ScrapeError::Init(e.to_string()))
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            document: None,
        })
    }

    /// Replace the current document with `body` without touching the network.
    pub fn load_html(&mut self, body: &str) {
        self.document = Some(HtmlDocument::parse(body));
    }

    pub fn document(&self) -> Option<&HtmlDocument> {
        self.document.as_ref()
    }

    /// Fetch a URL as text; non-2xx is an error.
    pub async fn get_text(&self, url: &str, headers: &Headers) -> Result<String> {
        let url = url::Url::parse(url).with_context(|| format!("Invalid URL {:?}", url))?;
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url.clone())
            .headers(to_header_map(headers)?)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error {} for {}", status, url);
        }

        resp.text().await.context("Failed to read response body")
    }
}

/// Names are inserted in sorted order so a map holding `Accept` and
/// `accept` always resolves the same way.
fn to_header_map(headers: &Headers) -> Result<HeaderMap> {
    let mut sorted: Vec<_> = headers.iter().collect();
    sorted.sort();
    let mut map = HeaderMap::with_capacity(headers.len());
    for (k, v) in sorted {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("Invalid header name {:?}", k))?;
        let value = HeaderValue::from_str(v)
            .with_context(|| format!("Invalid value for header {}", k))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait]
impl Backend for HttpBackend {
    type Element = HtmlElement;

    async fn prepare_document(&mut self, url: &str, headers: &Headers) -> Result<()> {
        let body = self.get_text(url, headers).await?;
        self.load_html(&body);
        Ok(())
    }

    async fn query_all(&self, path: &str) -> Vec<HtmlElement> {
        match &self.document {
            Some(doc) => doc.select(path),
            None => vec![],
        }
    }

    async fn query_single(&self, path: &str) -> HtmlElement {
        match &self.document {
            Some(doc) => doc.select_first(path),
            None => HtmlElement::absent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Element;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_header_map_rejects_bad_names() {
        let mut h = Headers::new();
        h.insert("Accept".into(), "*/*".into());
        assert_eq!(to_header_map(&h).unwrap().len(), 1);

        h.insert("bad header".into(), "x".into());
        assert!(to_header_map(&h).is_err());
    }

    #[tokio::test]
    async fn test_queries_before_and_after_load() {
        let mut backend = HttpBackend::new(&HttpConfig::default()).unwrap();
        assert!(backend.query_all("td").await.is_empty());
        assert!(backend.query_single("td").await.is_absent());

        backend.load_html("<table><tr><td>1</td><td>2</td></tr></table>");
        assert_eq!(backend.query_all("td").await.len(), 2);
        assert_eq!(
            backend.query_single("td").await.text_content().as_deref(),
            Some("1")
        );
    }

    #[test]
    fn test_header_map_is_deterministic_for_case_variants() {
        let mut h = Headers::new();
        h.insert("accept".into(), "text/html".into());
        h.insert("Accept".into(), "application/json".into());
        for _ in 0..50 {
            let map = to_header_map(&h.clone().into_iter().collect()).unwrap();
            assert_eq!(map.len(), 1);
            assert_eq!(map.get("accept").unwrap(), "text/html");
        }
    }

    /// Serves `/ok` with a small table and everything else as 404, one
    /// request per connection. Returns the base URL and the raw requests seen.
    async fn serve_pages() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let requests = Arc::clone(&seen);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf).to_string();
                let (status, body) = if request.starts_with("GET /ok ") {
                    ("200 OK", "<table><tr><td>1</td><td>2</td></tr></table>")
                } else {
                    ("404 Not Found", "missing")
                };
                requests.lock().unwrap().push(request);

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (base, seen)
    }

    #[tokio::test]
    async fn test_fetch_sends_headers_and_parses_body() {
        let (base, seen) = serve_pages().await;
        let mut backend = HttpBackend::new(&HttpConfig::default()).unwrap();

        let mut headers = Headers::new();
        headers.insert("x-trace".into(), "group".into());
        backend
            .prepare_document(&format!("{}/ok", base), &headers)
            .await
            .unwrap();

        assert_eq!(backend.query_all("td").await.len(), 2);
        assert_eq!(backend.query_single("td").await.text().await.as_deref(), Some("1"));

        let requests = seen.lock().unwrap();
        let request = requests[0].to_ascii_lowercase();
        assert!(request.contains("x-trace: group"));
        assert!(request.contains("user-agent: mozilla/5.0"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (base, _seen) = serve_pages().await;
        let mut backend = HttpBackend::new(&HttpConfig::default()).unwrap();
        backend.load_html("<p>previous</p>");

        let err = backend
            .prepare_document(&format!("{}/gone", base), &Headers::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("HTTP error 404"));
        // the earlier document stays in place
        assert!(!backend.query_single("p").await.is_absent());
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let mut backend = HttpBackend::new(&HttpConfig::default()).unwrap();
        let err = backend
            .prepare_document("not a url", &Headers::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid URL"));
    }
}
