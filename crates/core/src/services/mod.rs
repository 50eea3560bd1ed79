//! Business logic services.

#![allow(missing_docs)]

pub mod auth;
pub mod coalesce;
pub mod derivative;
pub mod media;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod preview;
pub mod purge;
pub mod room;
pub mod storage;
pub mod stores;
pub mod thumbnail;

pub use auth::{
    AdminDirectory, AdminDirectoryService, AuthContext, ConfigAdminDirectory, Tier,
    resolve_context,
};
pub use coalesce::{
    CacheKey, Cached, Clock, CoalescingCache, RequestGroup, Resolution, ResolutionSource,
    ResultCache, SystemClock, bucket_ts,
};
pub use derivative::{DerivativeStore, StoredObject, content_location, sha256_hex};
pub use media::{MediaService, PublicConfig, UploadInput};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{ManualClock, MemoryMetadata};
pub use preview::{PreviewCache, PreviewImage, PreviewService, UrlPreview};
pub use purge::{PurgeScope, PurgeService};
#[cfg(any(test, feature = "test-utils"))]
pub use room::StaticRoomDirectory;
pub use room::{NoOpRoomDirectory, RoomDirectory, RoomDirectoryService};
#[cfg(any(test, feature = "test-utils"))]
pub use storage::MemoryStorage;
pub use storage::{LocalStorage, StorageBackend, StorageService};
pub use stores::{MediaSelection, MediaStore, ObjectRefStore, PreviewStore, ThumbnailStore};
pub use thumbnail::{
    Derivative, ResizeMethod, ThumbnailPipeline, ThumbnailRequest, ThumbnailService,
    THUMBNAIL_CONTENT_TYPE,
};
