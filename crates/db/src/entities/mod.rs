//! Database entities.

pub mod media;
pub mod storage_object;
pub mod thumbnail;
pub mod url_preview;

pub use media::Entity as Media;
pub use storage_object::Entity as StorageObject;
pub use thumbnail::Entity as Thumbnail;
pub use url_preview::Entity as UrlPreview;
