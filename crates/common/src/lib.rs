//! Common utilities and shared types for mediarepo.
//!
//! This crate provides foundational components used across all mediarepo crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`],
//!   plus the persisted [`ErrorCode`] classification
//! - **ID Generation**: ULID media IDs via [`IdGenerator`], [`MediaRef`]
//! - **Access policy**: DNS-resolving CIDR checks for outbound fetches
//! - **URL Preview**: page metadata and image fetching for link previews
//!
//! # Example
//!
//! ```no_run
//! use mediarepo_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id = IdGenerator::new().generate();
//!     println!("{} will serve {id}", config.server.name);
//!     Ok(())
//! }
//! ```

pub mod access_policy;
pub mod config;
pub mod error;
pub mod id;
pub mod url_preview;

pub use access_policy::{AccessPolicy, NetworkAccessPolicy, ValidatedUrl};
pub use config::Config;
pub use error::{AccessDenial, AppError, AppResult, ErrorCode};
pub use id::{IdGenerator, MediaRef, user_server};
pub use url_preview::{FetchedImage, HttpPreviewFetcher, PageMetadata, PreviewFetcher};
