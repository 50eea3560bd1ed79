//! API endpoints.

mod admin;
mod media;
mod preview;
mod thumbnail;

use axum::Router;

use crate::middleware::AppState;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/v1", media::router())
        .nest("/v1/thumbnail", thumbnail::router())
        .nest("/v1", preview::router())
        .nest("/v1/admin", admin::router())
}
