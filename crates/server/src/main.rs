//! mediarepo server entry point.

use std::sync::Arc;

use axum::{Router, middleware};
use mediarepo_api::{AppState, Authenticator, router as api_router};
use mediarepo_common::{Config, HttpPreviewFetcher, NetworkAccessPolicy};
use mediarepo_core::{
    ConfigAdminDirectory, DerivativeStore, LocalStorage, MediaService, NoOpRoomDirectory,
    PreviewService, PurgeService, SystemClock, ThumbnailService,
};
use mediarepo_db::repositories::{
    MediaRepository, StorageObjectRepository, ThumbnailRepository, UrlPreviewRepository,
};
use sea_orm::DatabaseConnection;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Wire repositories and services from configuration.
fn build_state(config: &Config, db: Arc<DatabaseConnection>) -> anyhow::Result<AppState> {
    let media_repo = Arc::new(MediaRepository::new(Arc::clone(&db)));
    let thumbnail_repo = Arc::new(ThumbnailRepository::new(Arc::clone(&db)));
    let preview_repo = Arc::new(UrlPreviewRepository::new(Arc::clone(&db)));
    let object_repo = Arc::new(StorageObjectRepository::new(db));

    let local_origin = config.server.name.clone();
    let blobs = Arc::new(LocalStorage::new(config.storage.base_path.clone()));
    let store = DerivativeStore::new(blobs, object_repo);

    let media_service = MediaService::new(
        media_repo.clone(),
        store.clone(),
        local_origin.clone(),
        config.uploads.clone(),
    );
    let thumbnail_service = ThumbnailService::new(
        media_repo.clone(),
        thumbnail_repo,
        store.clone(),
        &config.thumbnails,
    );
    let preview_service = PreviewService::new(
        &config.url_previews,
        preview_repo,
        Arc::new(NetworkAccessPolicy::from_settings(&config.url_previews)?),
        Arc::new(HttpPreviewFetcher::new(&config.url_previews)),
        media_service.clone(),
        Arc::new(SystemClock),
    );
    let purge_service = PurgeService::new(
        media_repo,
        store,
        Arc::new(NoOpRoomDirectory),
        local_origin.clone(),
    );

    let admins = Arc::new(ConfigAdminDirectory::new(&config.auth));
    let authenticator = Authenticator::new(&config.auth, admins, local_origin);

    Ok(AppState {
        media_service,
        thumbnail_service,
        preview_service,
        purge_service,
        authenticator,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediarepo=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting mediarepo server...");

    // Load configuration
    let config = Config::load()?;
    info!(server_name = %config.server.name, "Configuration loaded");

    // Connect to database
    let db = mediarepo_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    mediarepo_db::migrate(&db).await?;
    info!("Migrations completed");

    let state = build_state(&config, Arc::new(db))?;

    // Build router
    let mut app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mediarepo_api::middleware::auth_middleware,
        ));
    if let Ok(limit) = usize::try_from(config.uploads.max_size_bytes) {
        app = app.layer(RequestBodyLimitLayer::new(limit));
    }
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let listener =
        tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
