//! Data access repositories.

pub mod media;
pub mod storage_object;
pub mod thumbnail;
pub mod url_preview;

pub use media::{MediaRepository, PurgedMedia};
pub use storage_object::StorageObjectRepository;
pub use thumbnail::{ThumbnailKey, ThumbnailRepository};
pub use url_preview::UrlPreviewRepository;
