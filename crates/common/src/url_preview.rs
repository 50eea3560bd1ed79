//! Link preview fetching.
//!
//! Pulls OpenGraph and plain HTML metadata out of a page and downloads the
//! image it advertises. Callers hand in targets that already passed the
//! [`AccessPolicy`](crate::access_policy::AccessPolicy); the fetcher pins the
//! validated address and refuses redirects.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::{Client, StatusCode, redirect::Policy};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::access_policy::ValidatedUrl;
use crate::config::UrlPreviewSettings;
use crate::error::{AppError, AppResult};

/// Metadata extracted from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Page title.
    pub title: Option<String>,
    /// Page description.
    pub description: Option<String>,
    /// Site name.
    pub site_name: Option<String>,
    /// Absolute URL of the advertised preview image.
    pub image_url: Option<String>,
    /// Canonical URL if the page declares one, otherwise the fetched URL.
    pub url: String,
}

impl PageMetadata {
    /// Whether anything worth showing was found.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.image_url.is_none()
    }
}

/// A downloaded image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// Content type reported by the server.
    pub content_type: String,
    /// Last path segment of the URL, if any.
    pub file_name: Option<String>,
}

/// Fetches pages and images for previews.
#[async_trait]
pub trait PreviewFetcher: Send + Sync {
    /// Fetch a page and extract its metadata.
    async fn fetch_page(&self, target: &ValidatedUrl) -> AppResult<PageMetadata>;

    /// Fetch an image referenced by a page.
    async fn fetch_image(&self, target: &ValidatedUrl) -> AppResult<FetchedImage>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpPreviewFetcher {
    user_agent: String,
    timeout: Duration,
    max_bytes: u64,
}

impl HttpPreviewFetcher {
    /// Create a fetcher from the preview settings.
    #[must_use]
    pub fn new(settings: &UrlPreviewSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
            max_bytes: settings.max_page_bytes,
        }
    }

    fn client_for(&self, target: &ValidatedUrl) -> AppResult<Client> {
        let mut builder = Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .redirect(Policy::none());

        if target.host.parse::<IpAddr>().is_err() {
            builder = builder.resolve(&target.host, target.addr);
        }

        builder
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))
    }

    async fn get(&self, target: &ValidatedUrl) -> AppResult<(Vec<u8>, Option<String>)> {
        let client = self.client_for(target)?;
        let response = client
            .get(target.url.clone())
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{}: {e}", target.url)))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(AppError::NotFound(target.url.to_string()));
            }
            s => {
                return Err(AppError::Upstream(format!("{} returned {s}", target.url)));
            }
        }

        if let Some(length) = response.content_length()
            && length > self.max_bytes
        {
            return Err(AppError::Upstream(format!(
                "{} is too large ({length} bytes)",
                target.url
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::Upstream(format!("{}: {e}", target.url)))?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(AppError::Upstream(format!(
                    "{} exceeded {} bytes",
                    target.url, self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, content_type))
    }
}

#[async_trait]
impl PreviewFetcher for HttpPreviewFetcher {
    async fn fetch_page(&self, target: &ValidatedUrl) -> AppResult<PageMetadata> {
        let (body, content_type) = self.get(target).await?;

        let content_type = content_type.unwrap_or_default();
        if !content_type.contains("text/html") && !content_type.contains("application/xhtml") {
            debug!(url = %target.url, content_type = %content_type, "Not an HTML page");
            return Err(AppError::NotFound(format!(
                "{} is not a previewable page",
                target.url
            )));
        }

        let html = String::from_utf8_lossy(&body);
        let metadata = extract_metadata(&html, &target.url);
        if metadata.is_empty() {
            return Err(AppError::NotFound(format!(
                "{} has no preview metadata",
                target.url
            )));
        }
        Ok(metadata)
    }

    async fn fetch_image(&self, target: &ValidatedUrl) -> AppResult<FetchedImage> {
        let (bytes, content_type) = self.get(target).await?;
        let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_string());
        if !content_type.starts_with("image/") {
            warn!(url = %target.url, content_type = %content_type, "Preview image is not an image");
            return Err(AppError::NotFound(format!("{} is not an image", target.url)));
        }

        let file_name = target
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string);

        Ok(FetchedImage {
            bytes,
            content_type,
            file_name,
        })
    }
}

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid")
});

static META_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("meta pattern is valid"));

static LINK_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\s[^>]*>").expect("link pattern is valid"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z_:-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("attr pattern is valid")
});

/// Attributes of a single tag, keys lowercased.
fn tag_attributes(tag: &str) -> HashMap<String, String> {
    ATTR_RE
        .captures_iter(tag)
        .filter_map(|cap| {
            let key = cap.get(1)?.as_str().to_ascii_lowercase();
            let value = cap.get(2).or_else(|| cap.get(3))?.as_str();
            Some((key, decode_html_entities(value)))
        })
        .collect()
}

/// Extract preview metadata from an HTML document.
///
/// OpenGraph properties win over their plain HTML counterparts.
#[must_use]
pub fn extract_metadata(html: &str, page_url: &Url) -> PageMetadata {
    let mut meta: HashMap<String, String> = HashMap::new();
    for tag in META_TAG_RE.find_iter(html) {
        let attrs = tag_attributes(tag.as_str());
        let key = attrs.get("property").or_else(|| attrs.get("name"));
        if let (Some(key), Some(content)) = (key, attrs.get("content")) {
            let content = content.trim();
            if !content.is_empty() {
                meta.entry(key.to_ascii_lowercase())
                    .or_insert_with(|| content.to_string());
            }
        }
    }

    let canonical = LINK_TAG_RE.find_iter(html).find_map(|tag| {
        let attrs = tag_attributes(tag.as_str());
        (attrs.get("rel").map(String::as_str) == Some("canonical"))
            .then(|| attrs.get("href").cloned())
            .flatten()
    });

    let title = meta.get("og:title").cloned().or_else(|| {
        TITLE_RE
            .captures(html)
            .and_then(|cap| cap.get(1))
            .map(|m| decode_html_entities(m.as_str().trim()))
            .filter(|t| !t.is_empty())
    });

    let description = meta
        .get("og:description")
        .or_else(|| meta.get("description"))
        .cloned();

    let image_url = meta
        .get("og:image")
        .or_else(|| meta.get("og:image:url"))
        .and_then(|raw| page_url.join(raw).ok())
        .map(|u| u.to_string());

    let url = meta
        .get("og:url")
        .cloned()
        .or(canonical)
        .and_then(|raw| page_url.join(&raw).ok())
        .map_or_else(|| page_url.to_string(), |u| u.to_string());

    PageMetadata {
        title,
        description,
        site_name: meta.get("og:site_name").cloned(),
        image_url,
        url,
    }
}

/// Decode the handful of HTML entities that show up in metadata.
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&#x2F;", "/")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
