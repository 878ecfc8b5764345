//! Source document fetching for the text extraction pass.
//!
//! [`Fetcher`] downloads `http(s)` links with retry and exponential backoff
//! and reads `file://` links from disk. Every fetched document carries the
//! SHA-256 of its bytes.

use std::time::Duration;

use legisync_shared::{AppConfig, LegisyncError, Result};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};
use url::Url;

/// Bytes inspected when sniffing an XML payload.
const XML_SNIFF_LEN: usize = 1000;

// ---------------------------------------------------------------------------
// FetchConfig
// ---------------------------------------------------------------------------

/// Runtime fetch configuration, built from `[extraction]`.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub user_agent: String,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.extraction.request_timeout_secs),
            max_retries: config.extraction.max_retries,
            retry_base_delay: Duration::from_millis(config.extraction.retry_base_delay_ms),
            user_agent: config.extraction.user_agent.clone(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// FetchedDocument
// ---------------------------------------------------------------------------

/// A downloaded source document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub bytes: Vec<u8>,
    /// Lowercased `Content-Type`, when the source reported one.
    pub content_type: Option<String>,
    pub sha256: String,
}

impl FetchedDocument {
    fn new(url: &str, bytes: Vec<u8>, content_type: Option<String>) -> Self {
        let sha256 = compute_hash(&bytes);
        Self {
            url: url.to_string(),
            bytes,
            content_type,
            sha256,
        }
    }

    /// Whether the payload looks like XML rather than an error page.
    pub fn looks_like_xml(&self) -> bool {
        if self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("xml"))
        {
            return true;
        }
        let head = &self.bytes[..self.bytes.len().min(XML_SNIFF_LEN)];
        let head = String::from_utf8_lossy(head);
        head.trim_start_matches('\u{feff}').trim_start().starts_with("<?xml")
            || head.contains("<bill>")
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP / `file://` document fetcher shared by all extraction workers.
#[derive(Debug, Clone)]
pub struct Fetcher {
    config: FetchConfig,
    client: Client,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout)
            .build()
            .map_err(|e| LegisyncError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Fetch `url` (http, https or file).
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        let parsed = Url::parse(url)
            .map_err(|e| LegisyncError::download(url, format!("invalid url: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => self.fetch_http(&parsed).await,
            "file" => read_local(url, &parsed).await,
            other => Err(LegisyncError::download(
                url,
                format!("unsupported scheme: {other}"),
            )),
        }
    }

    /// Fetch an XML rendition, rejecting payloads that are not XML.
    pub async fn fetch_xml(&self, url: &str) -> Result<FetchedDocument> {
        let doc = self.fetch(url).await?;
        if !doc.looks_like_xml() {
            return Err(LegisyncError::download(url, "response is not XML"));
        }
        Ok(doc)
    }

    async fn fetch_http(&self, url: &Url) -> Result<FetchedDocument> {
        let mut attempt = 0u32;
        loop {
            match self.try_once(url).await {
                Ok(doc) => return Ok(doc),
                Err(Attempt::Fatal(e)) => return Err(e),
                Err(Attempt::Retryable(e)) if attempt < self.config.max_retries => {
                    let delay = self.config.retry_base_delay * 2u32.saturating_pow(attempt);
                    warn!(%url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying download");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Attempt::Retryable(e)) => return Err(e),
            }
        }
    }

    async fn try_once(&self, url: &Url) -> std::result::Result<FetchedDocument, Attempt> {
        debug!(%url, "requesting document");
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            Attempt::Retryable(LegisyncError::download(url.as_str(), e.to_string()))
        })?;

        let status = response.status();
        if !status.is_success() {
            let err = match status {
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    LegisyncError::missing_file(format!("{url} (HTTP {status})"))
                }
                _ => LegisyncError::download(url.as_str(), format!("HTTP {status}")),
            };
            return Err(if is_retryable(status) {
                Attempt::Retryable(err)
            } else {
                Attempt::Fatal(err)
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_lowercase);
        let bytes = response.bytes().await.map_err(|e| {
            Attempt::Retryable(LegisyncError::download(
                url.as_str(),
                format!("body read failed: {e}"),
            ))
        })?;

        Ok(FetchedDocument::new(url.as_str(), bytes.to_vec(), content_type))
    }
}

enum Attempt {
    Retryable(LegisyncError),
    Fatal(LegisyncError),
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

async fn read_local(url: &str, parsed: &Url) -> Result<FetchedDocument> {
    let path = parsed
        .to_file_path()
        .map_err(|_| LegisyncError::download(url, "not a local file path"))?;
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(FetchedDocument::new(url, bytes, None)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(LegisyncError::missing_file(path.display().to_string()))
        }
        Err(e) => Err(LegisyncError::io(path, e)),
    }
}

/// Last path segment of a URL, if it names a file (`HB0001.pdf`).
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    (!name.is_empty() && name.contains('.')).then(|| name.to_string())
}

/// Compute the hex SHA-256 of `bytes`.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
