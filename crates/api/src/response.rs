//! API response types.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use mediarepo_common::MediaRef;
use mediarepo_core::UrlPreview;
use mediarepo_db::entities::media;
use serde::Serialize;

/// Result of an upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub content_uri: String,
}

impl From<&media::Model> for UploadResponse {
    fn from(m: &media::Model) -> Self {
        Self {
            content_uri: format!("mxc://{}/{}", m.origin, m.media_id),
        }
    }
}

/// Result of a quarantine change.
#[derive(Debug, Serialize)]
pub struct QuarantineResponse {
    pub quarantined: bool,
}

/// Result of a purge.
#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub purged: bool,
    /// `server/media_id` of every removed record.
    pub affected: Vec<String>,
}

impl From<Vec<media::Model>> for PurgeResponse {
    fn from(removed: Vec<media::Model>) -> Self {
        Self {
            purged: true,
            affected: removed
                .into_iter()
                .map(|m| MediaRef::new(m.origin, m.media_id).to_string())
                .collect(),
        }
    }
}

/// A link preview in OpenGraph keys.
#[derive(Debug, Default, Serialize)]
pub struct PreviewResponse {
    #[serde(rename = "og:title", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "og:description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "og:site_name", skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(rename = "og:url", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "og:image", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "og:image:type", skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    #[serde(rename = "matrix:image:size", skip_serializing_if = "Option::is_none")]
    pub image_size: Option<i64>,
    #[serde(rename = "og:image:width", skip_serializing_if = "Option::is_none")]
    pub image_width: Option<i32>,
    #[serde(rename = "og:image:height", skip_serializing_if = "Option::is_none")]
    pub image_height: Option<i32>,
}

impl From<UrlPreview> for PreviewResponse {
    fn from(p: UrlPreview) -> Self {
        let mut response = Self {
            title: p.title,
            description: p.description,
            site_name: p.site_name,
            url: p.url,
            ..Self::default()
        };
        if let Some(image) = p.image {
            response.image = Some(format!("mxc://{}", image.media));
            response.image_type = Some(image.content_type);
            response.image_size = Some(image.size_bytes);
            response.image_width = image.width;
            response.image_height = image.height;
        }
        response
    }
}

/// Raw media bytes with their content type.
pub fn media_bytes(content_type: &str, bytes: Vec<u8>, file_name: Option<&str>) -> Response {
    let mut response = (StatusCode::OK, bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(name) = file_name
        && let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{name}\""))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
