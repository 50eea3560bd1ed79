//! URL preview endpoint.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use mediarepo_common::AppResult;
use serde::Deserialize;

use crate::{extractors::AuthUser, middleware::AppState, response::PreviewResponse};

/// Preview query parameters.
#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub url: String,
    /// Point in time, in milliseconds since the epoch, the preview should
    /// describe.
    pub ts: Option<i64>,
}

async fn preview_url(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> AppResult<Json<PreviewResponse>> {
    let resolved = state
        .preview_service
        .preview(
            &query.url,
            caller.user_id().unwrap_or_default(),
            query.ts,
        )
        .await?;
    Ok(Json(PreviewResponse::from(resolved.value)))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/preview_url", get(preview_url))
}
