//! Upload, download and public configuration endpoints.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, header},
    response::Response,
    routing::{get, post},
};
use mediarepo_common::AppResult;
use mediarepo_core::{PublicConfig, UploadInput};
use serde::Deserialize;

use crate::{
    extractors::{AuthUser, MaybeAuthUser},
    middleware::AppState,
    response::{UploadResponse, media_bytes},
};

/// Upload query parameters.
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

/// Settings clients may see.
async fn config(State(state): State<AppState>) -> Json<PublicConfig> {
    Json(state.media_service.public_config())
}

/// Store the request body as a new upload.
async fn upload(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadResponse>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let record = state
        .media_service
        .upload(UploadInput {
            user_id: caller.user_id().unwrap_or_default().to_string(),
            upload_name: query.filename.filter(|name| !name.is_empty()),
            content_type,
            bytes: body.to_vec(),
        })
        .await?;

    Ok(Json(UploadResponse::from(&record)))
}

/// Original bytes of a media record.
async fn download(
    MaybeAuthUser(caller): MaybeAuthUser,
    State(state): State<AppState>,
    Path((server, media_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let (record, bytes) = state
        .media_service
        .download(&server, &media_id, caller.as_ref())
        .await?;
    Ok(media_bytes(
        &record.content_type,
        bytes,
        record.upload_name.as_deref(),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/config", get(config))
        // The upload size limit is enforced by the media service.
        .route("/upload", post(upload).layer(DefaultBodyLimit::disable()))
        .route("/download/{server}/{media_id}", get(download))
}
