//! Career-site scrapers.
//!
//! Every platform implements [`Scraper`]; the [`Registry`] maps a company's
//! platform tag to the implementation. Adding a platform means a new file here
//! and one `register` call in [`Registry::with_builtin`].

mod ashby;
mod greenhouse;
mod lever;

pub use ashby::AshbyScraper;
pub use greenhouse::GreenhouseScraper;
pub use lever::LeverScraper;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Url;
use scraper::Html;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::RawJob;

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Platform tag this scraper answers for, lowercase.
    fn name(&self) -> &str;

    /// Fetch every open posting for `slug`.
    ///
    /// Fails instead of returning an empty list when the answer is unknown,
    /// and gives up promptly once `cancel` fires.
    async fn fetch_jobs(&self, cancel: &CancellationToken, slug: &str) -> Result<Vec<RawJob>>;
}

/// Maps platform tags to scrapers. Built once at startup.
#[derive(Clone, Default)]
pub struct Registry {
    scrapers: BTreeMap<String, Arc<dyn Scraper>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every platform this crate ships a scraper for.
    pub fn with_builtin(http: HttpClient) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GreenhouseScraper::new(http.clone())));
        registry.register(Arc::new(LeverScraper::new(http.clone())));
        registry.register(Arc::new(AshbyScraper::new(http)));
        registry
    }

    /// Add a scraper under its own name, replacing any previous one.
    pub fn register(&mut self, scraper: Arc<dyn Scraper>) {
        self.scrapers.insert(scraper.name().to_lowercase(), scraper);
    }

    pub fn resolve(&self, platform: &str) -> Result<Arc<dyn Scraper>> {
        self.scrapers
            .get(&platform.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| Error::UnknownPlatform(platform.to_string()))
    }

    pub fn platforms(&self) -> impl Iterator<Item = &str> {
        self.scrapers.keys().map(String::as_str)
    }
}

/// Shared HTTP client for the platform scrapers.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::transport("http", e))?;
        Ok(Self { client })
    }

    /// GET `url` and return the body, racing the request against `cancel`.
    pub async fn get_text(
        &self,
        platform: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            body = self.fetch(platform, url) => body,
        }
    }

    async fn fetch(&self, platform: &str, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Error::transport(platform, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::transport(
                platform,
                format!("authentication failed (HTTP {}) for {}", status, url),
            ));
        }
        if !status.is_success() {
            return Err(Error::transport(platform, format!("HTTP {} for {}", status, url)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(platform, e))?;
        debug!(platform, url, bytes = body.len(), "fetched postings");
        Ok(body)
    }
}

/// `base` with `segments` appended, each escaped as a single path segment,
/// and `query` as the query string.
pub(crate) fn endpoint(platform: &str, base: &str, segments: &[&str], query: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::transport(platform, format!("bad base URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::transport(platform, format!("base URL {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    url.set_query(Some(query));
    Ok(url)
}

/// Decode a JSON payload, reporting failures as a parse error for `platform`.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(platform: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| Error::parse(platform, e))
}

/// Final check every scraper's output passes through: no blank identifiers
/// or titles, and no external id twice. A bad batch is rejected whole.
pub(crate) fn finish(platform: &str, jobs: Vec<RawJob>) -> Result<Vec<RawJob>> {
    let mut seen = HashSet::with_capacity(jobs.len());
    let mut out = Vec::with_capacity(jobs.len());

    for mut job in jobs {
        job.external_id = job.external_id.trim().to_string();
        job.title = collapse_whitespace(&job.title);

        if job.external_id.is_empty() {
            return Err(Error::parse(platform, "posting without an external id"));
        }
        if job.title.is_empty() {
            return Err(Error::parse(
                platform,
                format!("posting {} has an empty title", job.external_id),
            ));
        }
        if !seen.insert(job.external_id.clone()) {
            return Err(Error::parse(
                platform,
                format!("posting {} listed twice", job.external_id),
            ));
        }
        out.push(job);
    }

    Ok(out)
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,;:!?)])").unwrap());
static REMOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bremote\b").unwrap());

pub(crate) fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").into_owned()
}

pub(crate) fn mentions_remote(s: &str) -> bool {
    REMOTE.is_match(s)
}

/// Plain text of an HTML fragment.
pub(crate) fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    let joined = collapse_whitespace(&text.join(" "));
    SPACE_BEFORE_PUNCT.replace_all(&joined, "$1").into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Client for the local test server; ignores any proxy in the environment.
    pub(crate) fn local_client() -> HttpClient {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpClient { client }
    }

    /// Answer one request on a local port with `status` and `body`.
    /// Returns the server's base URL and the request line it received.
    pub(crate) async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            let request_line = String::from_utf8_lossy(&head)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            let _ = tx.send(request_line);

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        (base, rx)
    }

    /// Scraper that replays a canned answer.
    pub(crate) struct CannedScraper {
        pub name: String,
        pub answer: std::sync::Mutex<Option<Result<Vec<RawJob>>>>,
    }

    impl CannedScraper {
        pub(crate) fn new(name: &str, answer: Result<Vec<RawJob>>) -> Self {
            Self {
                name: name.to_string(),
                answer: std::sync::Mutex::new(Some(answer)),
            }
        }
    }

    #[async_trait]
    impl Scraper for CannedScraper {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_jobs(&self, _cancel: &CancellationToken, _slug: &str) -> Result<Vec<RawJob>> {
            self.answer
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn posting(ext: &str, title: &str) -> RawJob {
        RawJob {
            external_id: ext.to_string(),
            title: title.to_string(),
            description: String::new(),
            location: String::new(),
            remote: false,
            department: String::new(),
            url: String::new(),
            posted_at: None,
        }
    }

    #[test]
    fn test_registry_resolves_builtin_platforms() {
        let http = HttpClient::new("hunt-test", Duration::from_secs(1)).unwrap();
        let registry = Registry::with_builtin(http);
        assert_eq!(
            registry.platforms().collect::<Vec<_>>(),
            vec!["ashby", "greenhouse", "lever"]
        );
        assert_eq!(registry.resolve("Greenhouse").unwrap().name(), "greenhouse");
        assert!(matches!(
            registry.resolve("workday"),
            Err(Error::UnknownPlatform(ref p)) if p == "workday"
        ));
    }

    #[test]
    fn test_registry_is_extended_by_registration() {
        let mut registry = Registry::new();
        assert!(registry.resolve("custom").is_err());
        registry.register(Arc::new(CannedScraper::new("custom", Ok(vec![]))));
        assert_eq!(registry.resolve("CUSTOM").unwrap().name(), "custom");
    }

    #[test]
    fn test_finish_rejects_bad_batches() {
        let ok = finish("x", vec![posting(" 1 ", "  Staff\n Engineer ")]).unwrap();
        assert_eq!(ok[0].external_id, "1");
        assert_eq!(ok[0].title, "Staff Engineer");

        assert!(matches!(
            finish("x", vec![posting("", "Engineer")]),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            finish("x", vec![posting("1", "   ")]),
            Err(Error::Parse { .. })
        ));
        assert!(matches!(
            finish("x", vec![posting("1", "A"), posting("1", "B")]),
            Err(Error::Parse { .. })
        ));
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<div><p>Build   things.</p><ul><li>Rust</li></ul></div>"),
            "Build things. Rust"
        );
        // escaped markup needs two passes
        let escaped = "&lt;p&gt;Hello &amp;amp; welcome&lt;/p&gt;";
        assert_eq!(html_to_text(&html_to_text(escaped)), "Hello & welcome");
        assert_eq!(
            html_to_text("<p>Ship <em>fast</em>, then <b>fix</b>!</p>"),
            "Ship fast, then fix!"
        );
    }

    #[test]
    fn test_endpoint_escapes_each_segment() {
        let url = endpoint("x", "https://api.example.com/v1/boards", &["acme/jobs?x=1", "jobs"], "content=true")
            .unwrap();
        assert_eq!(
            url.path_segments().unwrap().collect::<Vec<_>>(),
            vec!["v1", "boards", "acme%2Fjobs%3Fx=1", "jobs"]
        );
        assert_eq!(url.query(), Some("content=true"));

        let root = endpoint("x", "http://127.0.0.1:8080", &["acme"], "mode=json").unwrap();
        assert_eq!(root.as_str(), "http://127.0.0.1:8080/acme?mode=json");

        assert!(matches!(
            endpoint("x", "not a url", &["acme"], ""),
            Err(Error::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_forbidden_is_authentication_transport_error() {
        let (base, _) = serve_once("403 Forbidden", "").await;
        let err = local_client()
            .get_text("test", &format!("{}/jobs", base), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            Error::Transport { ref message, .. } if message.contains("authentication failed")
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_is_authentication_transport_error() {
        let (base, _) = serve_once("401 Unauthorized", "").await;
        let err = local_client()
            .get_text("test", &format!("{}/jobs", base), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport { ref message, .. } if message.contains("authentication failed")
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let (base, _) = serve_once("503 Service Unavailable", "down").await;
        let err = local_client()
            .get_text("test", &format!("{}/jobs", base), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport { ref message, .. } if message.contains("503")
        ));
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let (base, request) = serve_once("200 OK", "{\"jobs\": []}").await;
        let body = local_client()
            .get_text("test", &format!("{}/jobs", base), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(body, "{\"jobs\": []}");
        assert_eq!(request.await.unwrap(), "GET /jobs HTTP/1.1");
    }

    #[test]
    fn test_mentions_remote() {
        assert!(mentions_remote("Remote - US"));
        assert!(mentions_remote("New York or remote"));
        assert!(!mentions_remote("Remotely Park, CA"));
    }

    #[tokio::test]
    async fn test_cancelled_request_returns_promptly() {
        let http = HttpClient::new("hunt-test", Duration::from_secs(30)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Unroutable address; the biased select must see the cancellation first.
        let result = http
            .get_text("test", "http://10.255.255.1/jobs", &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
