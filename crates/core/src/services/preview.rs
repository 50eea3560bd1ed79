//! URL previews, cached per time bucket.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mediarepo_common::config::UrlPreviewSettings;
use mediarepo_common::{
    AccessPolicy, AppError, AppResult, ErrorCode, MediaRef, PageMetadata, PreviewFetcher,
};
use mediarepo_db::entities::url_preview;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::coalesce::{Cached, Clock, CoalescingCache, Resolution, ResultCache};
use super::media::{MediaService, UploadInput};
use super::stores::PreviewStore;

/// Image attached to a preview, stored as local media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewImage {
    pub media: MediaRef,
    pub content_type: String,
    pub size_bytes: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
}

/// A link preview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPreview {
    pub title: Option<String>,
    pub description: Option<String>,
    pub site_name: Option<String>,
    /// Canonical URL of the page.
    pub url: Option<String>,
    pub image: Option<PreviewImage>,
}

impl UrlPreview {
    fn from_page(page: &PageMetadata) -> Self {
        Self {
            title: page.title.clone(),
            description: page.description.clone(),
            site_name: page.site_name.clone(),
            url: Some(page.url.clone()),
            image: None,
        }
    }
}

fn to_row(url: &str, bucket_ts: i64, outcome: &Cached<UrlPreview>) -> url_preview::Model {
    let mut row = url_preview::Model {
        url: url.to_string(),
        bucket_ts,
        error_code: None,
        title: None,
        description: None,
        site_name: None,
        canonical_url: None,
        image_ref: None,
        image_content_type: None,
        image_size_bytes: None,
        image_width: None,
        image_height: None,
        created_at: Utc::now().into(),
    };
    match outcome {
        Cached::Failure(code) => row.error_code = Some(code.as_str().to_string()),
        Cached::Value(preview) => {
            row.title.clone_from(&preview.title);
            row.description.clone_from(&preview.description);
            row.site_name.clone_from(&preview.site_name);
            row.canonical_url.clone_from(&preview.url);
            if let Some(image) = &preview.image {
                row.image_ref = Some(image.media.to_string());
                row.image_content_type = Some(image.content_type.clone());
                row.image_size_bytes = Some(image.size_bytes);
                row.image_width = image.width;
                row.image_height = image.height;
            }
        }
    }
    row
}

fn from_row(row: url_preview::Model) -> Cached<UrlPreview> {
    if let Some(code) = row.error_code {
        let code = code.parse().unwrap_or_else(|e: AppError| {
            warn!(url = %row.url, error = %e, "Unreadable cached error code");
            ErrorCode::Unknown
        });
        return Cached::Failure(code);
    }

    let image = row
        .image_ref
        .as_deref()
        .and_then(|r| r.parse::<MediaRef>().ok())
        .map(|media| PreviewImage {
            media,
            content_type: row.image_content_type.clone().unwrap_or_default(),
            size_bytes: row.image_size_bytes.unwrap_or_default(),
            width: row.image_width,
            height: row.image_height,
        });

    Cached::Value(UrlPreview {
        title: row.title,
        description: row.description,
        site_name: row.site_name,
        url: row.canonical_url,
        image,
    })
}

/// [`ResultCache`] over the preview table.
pub struct PreviewCache {
    store: Arc<dyn PreviewStore>,
}

impl PreviewCache {
    /// Wrap a preview store.
    #[must_use]
    pub fn new(store: Arc<dyn PreviewStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResultCache<UrlPreview> for PreviewCache {
    async fn lookup(&self, resource: &str, bucket: i64) -> AppResult<Option<Cached<UrlPreview>>> {
        Ok(self.store.find(resource, bucket).await?.map(from_row))
    }

    async fn store(
        &self,
        resource: &str,
        bucket: i64,
        outcome: Cached<UrlPreview>,
    ) -> AppResult<Cached<UrlPreview>> {
        let stored = self
            .store
            .insert_if_absent(to_row(resource, bucket, &outcome))
            .await?;
        Ok(from_row(stored))
    }
}

/// Generates and caches link previews.
#[derive(Clone)]
pub struct PreviewService {
    enabled: bool,
    cache: CoalescingCache<UrlPreview>,
    fetch: PreviewFetch,
}

/// Everything a preview computation needs, cheap to move into a task.
#[derive(Clone)]
struct PreviewFetch {
    policy: Arc<dyn AccessPolicy>,
    fetcher: Arc<dyn PreviewFetcher>,
    media: MediaService,
}

impl PreviewService {
    /// Create a preview service.
    pub fn new(
        settings: &UrlPreviewSettings,
        store: Arc<dyn PreviewStore>,
        policy: Arc<dyn AccessPolicy>,
        fetcher: Arc<dyn PreviewFetcher>,
        media: MediaService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            enabled: settings.enabled,
            cache: CoalescingCache::new(
                Arc::new(PreviewCache::new(store)),
                clock,
                settings.bucket_ms,
            ),
            fetch: PreviewFetch {
                policy,
                fetcher,
                media,
            },
        }
    }

    /// Preview of `url` as of `at_ms` (now when absent), requested by
    /// `user_id`.
    pub async fn preview(
        &self,
        url: &str,
        user_id: &str,
        at_ms: Option<i64>,
    ) -> AppResult<Resolution<UrlPreview>> {
        if !self.enabled {
            return Err(AppError::NotFound("URL previews are disabled".to_string()));
        }

        let at_ms = at_ms.unwrap_or_else(|| self.cache.now_ms());
        let origin = self.fetch.media.local_origin().to_string();
        let fetch = self.fetch.clone();
        let target = url.to_string();
        let user = user_id.to_string();

        let resolved = self
            .cache
            .resolve(url, &origin, at_ms, move || async move {
                fetch.generate(&target, &user).await
            })
            .await?;

        debug!(url = %url, bucket = resolved.bucket, source = ?resolved.source, "Resolved URL preview");
        Ok(resolved)
    }
}

impl PreviewFetch {
    async fn generate(&self, url: &str, user_id: &str) -> AppResult<UrlPreview> {
        let target = self.policy.validate(url).await?;
        info!(url = %target.url, "Fetching URL preview");

        let page = self.fetcher.fetch_page(&target).await?;
        let mut preview = UrlPreview::from_page(&page);

        if let Some(image_url) = &page.image_url {
            match self.store_image(image_url, user_id).await {
                Ok(image) => preview.image = Some(image),
                Err(e) => {
                    warn!(url = %url, image = %image_url, error = %e, "Dropping preview image");
                }
            }
        }

        Ok(preview)
    }

    async fn store_image(&self, image_url: &str, user_id: &str) -> AppResult<PreviewImage> {
        let target = self.policy.validate(image_url).await?;
        let fetched = self.fetcher.fetch_image(&target).await?;
        let dimensions = image_dimensions(&fetched.bytes);

        let record = self
            .media
            .upload(UploadInput {
                user_id: user_id.to_string(),
                upload_name: fetched.file_name,
                content_type: fetched.content_type,
                bytes: fetched.bytes,
            })
            .await?;

        Ok(PreviewImage {
            media: MediaRef::new(record.origin, record.media_id),
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            width: dimensions.and_then(|(w, _)| i32::try_from(w).ok()),
            height: dimensions.and_then(|(_, h)| i32::try_from(h).ok()),
        })
    }
}

/// Pixel size from the image header, without decoding the whole image.
fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}
