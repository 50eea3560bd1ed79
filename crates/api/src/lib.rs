//! HTTP API layer for mediarepo.
//!
//! This crate exposes the media repository over HTTP:
//!
//! - **Endpoints**: upload, download, thumbnails, URL previews and the
//!   administrative quarantine and purge operations
//! - **Extractors**: the authenticated caller
//! - **Middleware**: bearer-token authentication
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
pub use middleware::{AppState, Authenticator};
