//! Thumbnail endpoint.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Response,
    routing::get,
};
use mediarepo_common::AppResult;
use mediarepo_core::ThumbnailRequest;
use serde::Deserialize;

use crate::{middleware::AppState, response::media_bytes};

/// Thumbnail query parameters.
#[derive(Debug, Deserialize)]
pub struct ThumbnailQuery {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub animated: bool,
    #[serde(default)]
    pub force: bool,
}

fn default_method() -> String {
    "scale".to_string()
}

/// A thumbnail of a media record, generated on first request.
async fn thumbnail(
    State(state): State<AppState>,
    Path((server, media_id)): Path<(String, String)>,
    Query(query): Query<ThumbnailQuery>,
) -> AppResult<Response> {
    let request = ThumbnailRequest::parse(
        query.width,
        query.height,
        &query.method,
        query.animated,
        query.force,
    )?;

    let derivative = state
        .thumbnail_service
        .thumbnail(&server, &media_id, request)
        .await?;
    let bytes = state.thumbnail_service.read(&derivative).await?;
    Ok(media_bytes(&derivative.content_type, bytes, None))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/{server}/{media_id}", get(thumbnail))
}
