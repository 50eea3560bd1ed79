//! Thumbnail generation.
//!
//! [`ThumbnailPipeline`] turns one source image into one derivative. The
//! [`ThumbnailService`] in front of it resolves media records, reuses stored
//! thumbnails and coalesces concurrent requests for the same identity.

use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use image::{DynamicImage, GenericImageView, ImageFormat, imageops::FilterType};
use mediarepo_common::config::ThumbnailConfig;
use mediarepo_common::{AppError, AppResult};
use mediarepo_db::entities::{media, thumbnail};
use mediarepo_db::repositories::ThumbnailKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::coalesce::RequestGroup;
use super::derivative::DerivativeStore;
use super::stores::{MediaStore, ThumbnailStore};

/// Content type of every generated thumbnail.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/png";

/// How the source is fitted into the requested box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    /// Fit inside the box, keeping the aspect ratio.
    Scale,
    /// Fill the box exactly, cropping around the center.
    Crop,
}

impl ResizeMethod {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scale => "scale",
            Self::Crop => "crop",
        }
    }
}

impl fmt::Display for ResizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResizeMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scale" => Ok(Self::Scale),
            "crop" => Ok(Self::Crop),
            other => Err(AppError::Validation(format!(
                "unknown thumbnail method: {other}"
            ))),
        }
    }
}

/// A validated thumbnail request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub width: u32,
    pub height: u32,
    pub method: ResizeMethod,
    pub animated: bool,
    pub force: bool,
}

impl ThumbnailRequest {
    /// Parse and validate raw request parameters. The method is checked
    /// first.
    pub fn parse(
        width: u32,
        height: u32,
        method: &str,
        animated: bool,
        force: bool,
    ) -> AppResult<Self> {
        let method = method.parse()?;
        if width == 0 || height == 0 {
            return Err(AppError::Validation(format!(
                "thumbnail box must be at least 1x1, got {width}x{height}"
            )));
        }
        Ok(Self {
            width,
            height,
            method,
            animated,
            force,
        })
    }

    /// Shrink the box to fit within `max_width` x `max_height`.
    #[must_use]
    pub fn clamped(mut self, max_width: u32, max_height: u32) -> Self {
        self.width = self.width.min(max_width.max(1));
        self.height = self.height.min(max_height.max(1));
        self
    }
}

/// What to do with a decoded source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizePlan {
    /// The source already fits; hand it back unchanged.
    UseSource,
    /// Resize to the given box with the given method.
    Resize {
        width: u32,
        height: u32,
        method: ResizeMethod,
    },
}

/// Decide how to treat a `src_width` x `src_height` source.
///
/// Equal aspect ratios always scale. A source that fits inside the box is
/// never enlarged: without `force` it is used as is, with `force` the box
/// shrinks to the source size.
#[must_use]
pub fn plan_resize(src_width: u32, src_height: u32, request: &ThumbnailRequest) -> ResizePlan {
    let same_aspect = u64::from(src_width) * u64::from(request.height)
        == u64::from(request.width) * u64::from(src_height);
    let method = if same_aspect {
        ResizeMethod::Scale
    } else {
        request.method
    };

    if src_width <= request.width && src_height <= request.height {
        if !request.force {
            return ResizePlan::UseSource;
        }
        return ResizePlan::Resize {
            width: src_width,
            height: src_height,
            method,
        };
    }

    ResizePlan::Resize {
        width: request.width,
        height: request.height,
        method,
    }
}

/// Output of [`render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// The source is used unchanged.
    Source { width: u32, height: u32 },
    /// A freshly encoded PNG.
    Encoded {
        png: Vec<u8>,
        width: u32,
        height: u32,
        method: ResizeMethod,
    },
}

/// Decode `source`, resize it and encode the result as PNG.
///
/// CPU bound; run it on the blocking pool.
pub fn render(source: &[u8], request: &ThumbnailRequest) -> AppResult<Rendered> {
    let decoded = image::load_from_memory(source)
        .map_err(|e| AppError::Decode(format!("failed to decode source image: {e}")))?;
    let (src_width, src_height) = decoded.dimensions();

    match plan_resize(src_width, src_height, request) {
        ResizePlan::UseSource => Ok(Rendered::Source {
            width: src_width,
            height: src_height,
        }),
        ResizePlan::Resize {
            width,
            height,
            method,
        } => {
            let resized = resize(&decoded, width, height, method);
            let (width, height) = resized.dimensions();

            let mut png = Vec::new();
            resized
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| AppError::Storage(format!("failed to encode thumbnail: {e}")))?;

            Ok(Rendered::Encoded {
                png,
                width,
                height,
                method,
            })
        }
    }
}

fn resize(image: &DynamicImage, width: u32, height: u32, method: ResizeMethod) -> DynamicImage {
    match method {
        ResizeMethod::Scale => image.resize(width, height, FilterType::Lanczos3),
        ResizeMethod::Crop => image.resize_to_fill(width, height, FilterType::Lanczos3),
    }
}

/// A thumbnail ready to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Derivative {
    pub content_type: String,
    pub location: String,
    pub sha256: String,
    pub size_bytes: i64,
    /// Pixel size, when known.
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub animated: bool,
    /// The source was returned because it already fit the box.
    pub is_source: bool,
}

impl Derivative {
    fn from_record(record: &thumbnail::Model) -> Self {
        Self {
            content_type: record.content_type.clone(),
            location: record.location.clone(),
            sha256: record.sha256.clone(),
            size_bytes: record.size_bytes,
            width: u32::try_from(record.rendered_width).ok(),
            height: u32::try_from(record.rendered_height).ok(),
            animated: record.animated,
            is_source: false,
        }
    }
}

fn pixels(value: Option<u32>) -> i32 {
    value.and_then(|v| i32::try_from(v).ok()).unwrap_or(0)
}

/// Decodes, resizes, encodes and persists thumbnails.
#[derive(Clone)]
pub struct ThumbnailPipeline {
    store: DerivativeStore,
    animated_types: Arc<HashSet<String>>,
}

impl ThumbnailPipeline {
    /// Create a pipeline.
    pub fn new(store: DerivativeStore, animated_types: impl IntoIterator<Item = String>) -> Self {
        Self {
            store,
            animated_types: Arc::new(animated_types.into_iter().collect()),
        }
    }

    /// Whether thumbnails of `content_type` may be animated.
    #[must_use]
    pub fn allows_animation(&self, content_type: &str) -> bool {
        self.animated_types.contains(content_type)
    }

    /// The animated flag actually honored for `content_type`.
    #[must_use]
    pub fn effective_animated(&self, content_type: &str, requested: bool) -> bool {
        if requested && !self.allows_animation(content_type) {
            warn!(content_type = %content_type, "Animated thumbnail requested for a static type, downgrading");
            return false;
        }
        requested
    }

    /// Produce a derivative of `media` from its bytes.
    ///
    /// Generated images are persisted and the caller owns one reference to
    /// the returned location. When the source is returned unchanged nothing
    /// is persisted.
    pub async fn generate(
        &self,
        media: &media::Model,
        source: Vec<u8>,
        request: ThumbnailRequest,
    ) -> AppResult<Derivative> {
        let animated = self.effective_animated(&media.content_type, request.animated);

        let rendered = tokio::task::spawn_blocking(move || render(&source, &request))
            .await
            .map_err(|e| AppError::Internal(format!("thumbnail task failed: {e}")))?
            .inspect_err(|e| {
                warn!(origin = %media.origin, media_id = %media.media_id, error = %e, "Thumbnail render failed");
            })?;

        match rendered {
            Rendered::Source { width, height } => {
                debug!(origin = %media.origin, media_id = %media.media_id, "Source fits, not upscaling");
                Ok(Derivative {
                    content_type: media.content_type.clone(),
                    location: media.location.clone(),
                    sha256: media.sha256.clone(),
                    size_bytes: media.size_bytes,
                    width: Some(width),
                    height: Some(height),
                    animated,
                    is_source: true,
                })
            }
            Rendered::Encoded {
                png,
                width,
                height,
                method,
            } => {
                let stored = self.store.persist(&png).await.inspect_err(|e| {
                    error!(origin = %media.origin, media_id = %media.media_id, error = %e, "Failed to persist thumbnail");
                })?;
                let size_bytes = match self.store.size(&stored.location).await {
                    Ok(size) => size,
                    Err(e) => {
                        error!(location = %stored.location, error = %e, "Failed to size thumbnail");
                        if let Err(release_err) = self.store.release(&stored.location).await {
                            warn!(location = %stored.location, error = %release_err, "Failed to release unsized thumbnail");
                        }
                        return Err(e);
                    }
                };

                info!(
                    origin = %media.origin,
                    media_id = %media.media_id,
                    width,
                    height,
                    method = %method,
                    "Generated thumbnail"
                );

                Ok(Derivative {
                    content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
                    location: stored.location,
                    sha256: stored.sha256,
                    size_bytes,
                    width: Some(width),
                    height: Some(height),
                    animated,
                    is_source: false,
                })
            }
        }
    }
}

/// Serves thumbnails of stored media.
#[derive(Clone)]
pub struct ThumbnailService {
    media: Arc<dyn MediaStore>,
    thumbnails: Arc<dyn ThumbnailStore>,
    pipeline: ThumbnailPipeline,
    store: DerivativeStore,
    group: RequestGroup<Derivative>,
    max_width: u32,
    max_height: u32,
}

impl ThumbnailService {
    /// Create a thumbnail service.
    pub fn new(
        media: Arc<dyn MediaStore>,
        thumbnails: Arc<dyn ThumbnailStore>,
        store: DerivativeStore,
        config: &ThumbnailConfig,
    ) -> Self {
        Self {
            media,
            thumbnails,
            pipeline: ThumbnailPipeline::new(store.clone(), config.animated_types.clone()),
            store,
            group: RequestGroup::new(),
            max_width: config.max_width,
            max_height: config.max_height,
        }
    }

    /// Thumbnail of `origin/media_id` for `request`.
    pub async fn thumbnail(
        &self,
        origin: &str,
        media_id: &str,
        request: ThumbnailRequest,
    ) -> AppResult<Derivative> {
        let record = self
            .media
            .find(origin, media_id)
            .await?
            .filter(|r| !r.quarantined)
            .ok_or_else(|| AppError::NotFound(format!("Media: {origin}/{media_id}")))?;

        let mut request = request.clamped(self.max_width, self.max_height);
        request.animated = self
            .pipeline
            .effective_animated(&record.content_type, request.animated);

        let key = ThumbnailKey {
            origin: origin.to_string(),
            media_id: media_id.to_string(),
            width: i32::try_from(request.width)
                .map_err(|_| AppError::Validation("width out of range".to_string()))?,
            height: i32::try_from(request.height)
                .map_err(|_| AppError::Validation("height out of range".to_string()))?,
            method: request.method.as_str().to_string(),
            animated: request.animated,
            forced: request.force,
        };

        if let Some(existing) = self.thumbnails.find(&key).await? {
            return Ok(Derivative::from_record(&existing));
        }

        let group_key = format!(
            "{}/{}/{}x{}/{}/{}/{}",
            key.origin, key.media_id, key.width, key.height, key.method, key.animated, key.forced
        );
        let this = self.clone();
        let (result, _) = self
            .group
            .run(&group_key, move || async move {
                this.generate_and_record(record, key, request).await
            })
            .await;
        result
    }

    /// Bytes of a derivative returned by [`Self::thumbnail`].
    pub async fn read(&self, derivative: &Derivative) -> AppResult<Vec<u8>> {
        self.store.read(&derivative.location).await
    }

    async fn generate_and_record(
        &self,
        record: media::Model,
        key: ThumbnailKey,
        request: ThumbnailRequest,
    ) -> AppResult<Derivative> {
        if let Some(existing) = self.thumbnails.find(&key).await? {
            return Ok(Derivative::from_record(&existing));
        }

        let source = self.store.read(&record.location).await?;
        let derivative = self.pipeline.generate(&record, source, request).await?;
        if derivative.is_source {
            return Ok(derivative);
        }

        let row = thumbnail::Model {
            origin: key.origin,
            media_id: key.media_id,
            width: key.width,
            height: key.height,
            method: key.method,
            animated: key.animated,
            forced: key.forced,
            content_type: derivative.content_type.clone(),
            size_bytes: derivative.size_bytes,
            rendered_width: pixels(derivative.width),
            rendered_height: pixels(derivative.height),
            sha256: derivative.sha256.clone(),
            location: derivative.location.clone(),
            created_at: Utc::now().into(),
        };

        let (stored, inserted) = match self.thumbnails.insert_if_absent(row).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(release_err) = self.store.release(&derivative.location).await {
                    warn!(location = %derivative.location, error = %release_err, "Failed to release unrecorded thumbnail");
                }
                return Err(e);
            }
        };
        if !inserted {
            debug!(location = %derivative.location, "Thumbnail recorded concurrently, releasing ours");
            self.store.release(&derivative.location).await?;
            return Ok(Derivative::from_record(&stored));
        }
        Ok(derivative)
    }
}
