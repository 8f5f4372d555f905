// src/fetch.rs
//! Resolve a submitted URL to plain article text.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

pub const MAX_ARTICLE_CHARS: usize = 20_000;

/// Upper bound on a fetched HTML body.
pub const MAX_FETCH_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetching {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("no readable text at {url}")]
    Empty { url: String },
    #[error("response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub title: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
    fn name(&self) -> &'static str;
}

pub struct HttpFetcher {
    http: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("truthguard/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("building fetch client: {e}"))?;
        Ok(Self {
            http,
            max_bytes: MAX_FETCH_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn read_body(&self, url: &str, resp: reqwest::Response) -> Result<String, FetchError> {
        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if resp.content_length().is_some_and(|n| n > self.max_bytes as u64) {
            return Err(too_large());
        }

        // chunked or lying servers: count as we go
        let mut buf = Vec::new();
        let mut chunks = resp.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if buf.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let t0 = std::time::Instant::now();
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        let body = self.read_body(url, resp).await?;
        let page = extract_page(&body);
        debug!(url, chars = page.text.chars().count(), elapsed_ms = t0.elapsed().as_millis() as u64, "fetched article");
        if page.text.is_empty() {
            return Err(FetchError::Empty {
                url: url.to_string(),
            });
        }
        Ok(page)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Title plus body text of an HTML document.
pub fn extract_page(html: &str) -> FetchedPage {
    static RE_TITLE: OnceCell<Regex> = OnceCell::new();
    static RE_BLOCKS: OnceCell<Regex> = OnceCell::new();

    let title = re(&RE_TITLE, r"(?is)<title[^>]*>(.*?)</title>")
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| normalize_text(m.as_str()))
        .filter(|t| !t.is_empty());

    // script/style/head bodies are never article text
    let body = re(
        &RE_BLOCKS,
        r"(?is)<(script|style|noscript|head)\b[^>]*>.*?</(script|style|noscript|head)>",
    )
    .replace_all(html, " ");

    FetchedPage {
        title,
        text: normalize_text(&body),
    }
}

/// Normalize text: strip tags, decode entities, straighten quotes, collapse
/// whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    // Tags go first so encoded markup (&lt;b&gt;) survives as text.
    let out = re(&RE_TAGS, r"(?is)</?[a-z!][^>]*>").replace_all(s, " ");
    let out = html_escape::decode_html_entities(&out).to_string();

    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let out = re(&RE_WS, r"\s+").replace_all(&out, " ");
    let out = out.trim();

    match out.char_indices().nth(MAX_ARTICLE_CHARS) {
        Some((idx, _)) => out[..idx].to_string(),
        None => out.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markup_and_scripts() {
        let html = r#"<html><head><title>Senate &amp; House</title>
            <script>var x = "shocking";</script></head>
            <body><h1>Vote  today</h1><p>It&#39;s “close”.</p>
            <style>p { color: red }</style></body></html>"#;
        let page = extract_page(html);
        assert_eq!(page.title.as_deref(), Some("Senate & House"));
        assert_eq!(page.text, "Vote today It's \"close\".");
    }

    #[test]
    fn text_is_capped() {
        let long = "a".repeat(MAX_ARTICLE_CHARS + 50);
        assert_eq!(normalize_text(&long).chars().count(), MAX_ARTICLE_CHARS);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let page = format!("<html><body><p>{}</p></body></html>", "word ".repeat(400));
        Mock::given(method("GET"))
            .and(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page.clone()))
            .mount(&server)
            .await;

        let small = HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_max_bytes(256);
        let err = small.fetch(&format!("{}/big", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 256, .. }), "{err:?}");

        // same page under a roomier limit reads fine
        let roomy = HttpFetcher::new(Duration::from_secs(5))
            .unwrap()
            .with_max_bytes(page.len());
        let got = roomy.fetch(&format!("{}/big", server.uri())).await.unwrap();
        assert!(got.text.starts_with("word word"));
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(normalize_text("  plain\n\ntext "), "plain text");
    }
}
