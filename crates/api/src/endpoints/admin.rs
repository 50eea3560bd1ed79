//! Quarantine and purge endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::post,
};
use chrono::{DateTime, Utc};
use mediarepo_common::{AppError, AppResult, MediaRef};
use mediarepo_core::{AuthContext, PurgeScope};
use serde::Deserialize;
use tracing::info;

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{PurgeResponse, QuarantineResponse},
};

/// Quarantine query parameters.
#[derive(Debug, Deserialize)]
pub struct QuarantineQuery {
    #[serde(default)]
    pub unquarantine: bool,
}

/// Cut-off for time-scoped purges.
#[derive(Debug, Deserialize)]
pub struct BeforeQuery {
    /// Milliseconds since the epoch.
    pub before_ts: Option<i64>,
}

/// Query for purging old media.
#[derive(Debug, Deserialize)]
pub struct OldMediaQuery {
    pub before_ts: Option<i64>,
    #[serde(default)]
    pub include_local: bool,
}

/// Query for purging quarantined media.
#[derive(Debug, Deserialize)]
pub struct QuarantinedQuery {
    pub server: Option<String>,
}

fn before_or_now(before_ts: Option<i64>) -> AppResult<DateTime<Utc>> {
    match before_ts {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| AppError::BadRequest(format!("before_ts out of range: {ms}"))),
        None => Ok(Utc::now()),
    }
}

async fn quarantine(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path((server, media_id)): Path<(String, String)>,
    Query(query): Query<QuarantineQuery>,
) -> AppResult<Json<QuarantineResponse>> {
    let record = state
        .media_service
        .set_quarantine(&server, &media_id, !query.unquarantine, &caller)
        .await?;
    Ok(Json(QuarantineResponse {
        quarantined: record.quarantined,
    }))
}

async fn purge(
    state: &AppState,
    scope: PurgeScope,
    caller: &AuthContext,
) -> AppResult<Json<PurgeResponse>> {
    info!(scope = ?scope, caller = ?caller.user_id(), "Purge requested");
    let removed = state.purge_service.purge(scope, caller).await?;
    Ok(Json(PurgeResponse::from(removed)))
}

async fn purge_record(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path((server, media_id)): Path<(String, String)>,
) -> AppResult<Json<PurgeResponse>> {
    purge(
        &state,
        PurgeScope::Single {
            origin: server,
            media_id,
        },
        &caller,
    )
    .await
}

async fn purge_server(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(server): Path<String>,
    Query(query): Query<BeforeQuery>,
) -> AppResult<Json<PurgeResponse>> {
    let before = before_or_now(query.before_ts)?;
    purge(
        &state,
        PurgeScope::Origin {
            origin: server,
            before,
        },
        &caller,
    )
    .await
}

async fn purge_remote(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<BeforeQuery>,
) -> AppResult<Json<PurgeResponse>> {
    let Some(before_ts) = query.before_ts else {
        return Err(AppError::BadRequest("Missing before_ts argument".to_string()));
    };
    let before = before_or_now(Some(before_ts))?;
    purge(&state, PurgeScope::Remote { before }, &caller).await
}

async fn purge_quarantined(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<QuarantinedQuery>,
) -> AppResult<Json<PurgeResponse>> {
    purge(
        &state,
        PurgeScope::Quarantined {
            origin: query.server.filter(|s| !s.is_empty()),
        },
        &caller,
    )
    .await
}

async fn purge_old(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Query(query): Query<OldMediaQuery>,
) -> AppResult<Json<PurgeResponse>> {
    let before = before_or_now(query.before_ts)?;
    purge(
        &state,
        PurgeScope::Old {
            before,
            include_local: query.include_local,
        },
        &caller,
    )
    .await
}

async fn purge_user(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<BeforeQuery>,
) -> AppResult<Json<PurgeResponse>> {
    let before = before_or_now(query.before_ts)?;
    purge(&state, PurgeScope::User { user_id, before }, &caller).await
}

async fn purge_room(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<BeforeQuery>,
) -> AppResult<Json<PurgeResponse>> {
    let before = before_or_now(query.before_ts)?;
    info!(room_id = %room_id, caller = ?caller.user_id(), "Room purge requested");
    let removed = state
        .purge_service
        .purge_room(&room_id, Some(before), &caller)
        .await?;
    Ok(Json(PurgeResponse::from(removed)))
}

/// Purge a JSON list of `server/media_id` references.
async fn purge_media(
    AuthUser(caller): AuthUser,
    State(state): State<AppState>,
    Json(refs): Json<Vec<String>>,
) -> AppResult<Json<PurgeResponse>> {
    let refs = refs
        .iter()
        .map(|r| r.parse::<MediaRef>())
        .collect::<AppResult<Vec<_>>>()?;
    purge(&state, PurgeScope::Explicit { refs, before: None }, &caller).await
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/quarantine/{server}/{media_id}", post(quarantine))
        .route("/purge/remote", post(purge_remote))
        .route("/purge/quarantined", post(purge_quarantined))
        .route("/purge/old", post(purge_old))
        .route("/purge/media", post(purge_media))
        .route("/purge/server/{server}", post(purge_server))
        .route("/purge/user/{user_id}", post(purge_user))
        .route("/purge/room/{room_id}", post(purge_room))
        .route("/purge/{server}/{media_id}", post(purge_record))
}
