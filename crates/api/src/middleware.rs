//! API middleware.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use mediarepo_common::AppResult;
use mediarepo_common::config::AuthConfig;
use mediarepo_core::{
    AdminDirectoryService, AuthContext, MediaService, PreviewService, PurgeService,
    ThumbnailService, resolve_context,
};
use tracing::{debug, warn};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub media_service: MediaService,
    pub thumbnail_service: ThumbnailService,
    pub preview_service: PreviewService,
    pub purge_service: PurgeService,
    pub authenticator: Authenticator,
}

/// Maps bearer tokens to callers.
#[derive(Clone)]
pub struct Authenticator {
    tokens: Arc<HashMap<String, String>>,
    shared_secret: Option<String>,
    admins: AdminDirectoryService,
    local_origin: String,
}

impl Authenticator {
    /// Build from the `[auth]` configuration section.
    pub fn new(
        config: &AuthConfig,
        admins: AdminDirectoryService,
        local_origin: impl Into<String>,
    ) -> Self {
        Self {
            tokens: Arc::new(config.tokens.clone()),
            shared_secret: config.shared_secret.clone().filter(|s| !s.is_empty()),
            admins,
            local_origin: local_origin.into(),
        }
    }

    /// The caller behind `token`, or `None` when the token is unknown.
    pub async fn authenticate(&self, token: &str) -> AppResult<Option<AuthContext>> {
        if self.shared_secret.as_deref() == Some(token) {
            return Ok(Some(AuthContext::GlobalAdmin { user_id: None }));
        }
        let Some(user_id) = self.tokens.get(token) else {
            return Ok(None);
        };
        resolve_context(self.admins.as_ref(), user_id, &self.local_origin)
            .await
            .map(Some)
    }
}

/// Authenticate the bearer token, if any, and attach the caller to the
/// request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth_header) = req.headers().get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        match state.authenticator.authenticate(token).await {
            Ok(Some(caller)) => {
                req.extensions_mut().insert(caller);
            }
            Ok(None) => debug!("Unknown access token"),
            Err(e) => warn!(error = %e, "Failed to resolve caller authority"),
        }
    }

    next.run(req).await
}
