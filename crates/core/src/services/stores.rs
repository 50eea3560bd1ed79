//! Metadata stores the services depend on.
//!
//! Each trait is implemented by the matching `mediarepo-db` repository. The
//! services only ever see the traits, so tests can swap in
//! [`MemoryMetadata`](crate::services::memory::MemoryMetadata).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediarepo_common::{AppResult, MediaRef};
use mediarepo_db::entities::{media, thumbnail, url_preview};
use mediarepo_db::repositories::{
    MediaRepository, PurgedMedia, StorageObjectRepository, ThumbnailKey, ThumbnailRepository,
    UrlPreviewRepository,
};
use sea_orm::ActiveModelTrait;

use super::storage::StorageBackend;

/// A set of media records chosen by a purge scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSelection {
    /// Records from `origin` created before `before`.
    OriginBefore {
        origin: String,
        before: DateTime<Utc>,
    },
    /// Records from every origin except `local_origin` created before `before`.
    RemoteBefore {
        local_origin: String,
        before: DateTime<Utc>,
    },
    /// Quarantined records, optionally from one origin only.
    Quarantined { origin: Option<String> },
    /// Records created before `before`, local ones only if `include_local`.
    Before {
        before: DateTime<Utc>,
        include_local: bool,
        local_origin: String,
    },
    /// Records uploaded by `user_id` before `before`.
    UserBefore {
        user_id: String,
        before: DateTime<Utc>,
    },
    /// Exactly these records. Unknown references are skipped.
    Refs(Vec<MediaRef>),
}

impl MediaSelection {
    /// Whether `record` belongs to this selection.
    #[must_use]
    pub fn matches(&self, record: &media::Model) -> bool {
        let created: DateTime<Utc> = record.created_at.into();
        match self {
            Self::OriginBefore { origin, before } => record.origin == *origin && created < *before,
            Self::RemoteBefore {
                local_origin,
                before,
            } => record.origin != *local_origin && created < *before,
            Self::Quarantined { origin } => {
                record.quarantined && origin.as_ref().is_none_or(|o| record.origin == *o)
            }
            Self::Before {
                before,
                include_local,
                local_origin,
            } => created < *before && (*include_local || record.origin != *local_origin),
            Self::UserBefore { user_id, before } => record.user_id == *user_id && created < *before,
            Self::Refs(refs) => refs
                .iter()
                .any(|r| r.origin == record.origin && r.media_id == record.media_id),
        }
    }
}

/// Media records.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Find one record.
    async fn find(&self, origin: &str, media_id: &str) -> AppResult<Option<media::Model>>;

    /// Insert a new record.
    async fn insert(&self, record: media::Model) -> AppResult<media::Model>;

    /// Set or clear the quarantine flag. Missing records are `NotFound`.
    async fn set_quarantined(
        &self,
        origin: &str,
        media_id: &str,
        quarantined: bool,
    ) -> AppResult<media::Model>;

    /// Records matching `selection`, oldest first.
    async fn select(&self, selection: &MediaSelection) -> AppResult<Vec<media::Model>>;

    /// Atomically delete a record and its thumbnails, releasing one storage
    /// reference per deleted row. `None` when the record is already gone.
    async fn purge(&self, origin: &str, media_id: &str) -> AppResult<Option<PurgedMedia>>;
}

/// Thumbnail records.
#[async_trait]
pub trait ThumbnailStore: Send + Sync {
    /// Find the record for a request identity.
    async fn find(&self, key: &ThumbnailKey) -> AppResult<Option<thumbnail::Model>>;

    /// Insert unless a record with the same identity exists. Returns the
    /// stored record and whether this call inserted it.
    async fn insert_if_absent(&self, record: thumbnail::Model)
    -> AppResult<(thumbnail::Model, bool)>;
}

/// Cached URL preview outcomes.
#[async_trait]
pub trait PreviewStore: Send + Sync {
    /// Find the outcome for `url` in `bucket_ts`.
    async fn find(&self, url: &str, bucket_ts: i64) -> AppResult<Option<url_preview::Model>>;

    /// Insert unless an outcome for the same `(url, bucket_ts)` exists.
    /// Returns the stored outcome; the first writer wins.
    async fn insert_if_absent(&self, record: url_preview::Model) -> AppResult<url_preview::Model>;
}

/// Reference counts of content-addressed blobs.
#[async_trait]
pub trait ObjectRefStore: Send + Sync {
    /// Add one reference, returning the new count.
    async fn acquire(&self, location: &str, sha256: &str, size_bytes: i64) -> AppResult<i64>;

    /// Drop one reference, returning the remaining count. A location at
    /// zero stays known until [`reclaim`](Self::reclaim) removes it.
    async fn release(&self, location: &str) -> AppResult<i64>;

    /// Delete the blob at `location` from `blobs` and forget the location,
    /// but only if nothing references it. Runs under the same guard as
    /// [`acquire`](Self::acquire). Returns whether the blob was deleted.
    async fn reclaim(&self, location: &str, blobs: &dyn StorageBackend) -> AppResult<bool>;
}

#[async_trait]
impl MediaStore for MediaRepository {
    async fn find(&self, origin: &str, media_id: &str) -> AppResult<Option<media::Model>> {
        Self::find(self, origin, media_id).await
    }

    async fn insert(&self, record: media::Model) -> AppResult<media::Model> {
        self.create(media::ActiveModel::from(record).reset_all())
            .await
    }

    async fn set_quarantined(
        &self,
        origin: &str,
        media_id: &str,
        quarantined: bool,
    ) -> AppResult<media::Model> {
        Self::set_quarantined(self, origin, media_id, quarantined).await
    }

    async fn select(&self, selection: &MediaSelection) -> AppResult<Vec<media::Model>> {
        match selection {
            MediaSelection::OriginBefore { origin, before } => {
                self.find_by_origin_before(origin, *before).await
            }
            MediaSelection::RemoteBefore {
                local_origin,
                before,
            } => self.find_remote_before(local_origin, *before).await,
            MediaSelection::Quarantined { origin } => {
                self.find_quarantined(origin.as_deref()).await
            }
            MediaSelection::Before {
                before,
                include_local,
                local_origin,
            } => self.find_before(*before, *include_local, local_origin).await,
            MediaSelection::UserBefore { user_id, before } => {
                self.find_by_user_before(user_id, *before).await
            }
            MediaSelection::Refs(refs) => self.find_many(refs).await,
        }
    }

    async fn purge(&self, origin: &str, media_id: &str) -> AppResult<Option<PurgedMedia>> {
        Self::purge(self, origin, media_id).await
    }
}

#[async_trait]
impl ThumbnailStore for ThumbnailRepository {
    async fn find(&self, key: &ThumbnailKey) -> AppResult<Option<thumbnail::Model>> {
        Self::find(self, key).await
    }

    async fn insert_if_absent(
        &self,
        record: thumbnail::Model,
    ) -> AppResult<(thumbnail::Model, bool)> {
        Self::insert_if_absent(self, record).await
    }
}

#[async_trait]
impl PreviewStore for UrlPreviewRepository {
    async fn find(&self, url: &str, bucket_ts: i64) -> AppResult<Option<url_preview::Model>> {
        Self::find(self, url, bucket_ts).await
    }

    async fn insert_if_absent(&self, record: url_preview::Model) -> AppResult<url_preview::Model> {
        Self::insert_if_absent(self, record).await
    }
}

#[async_trait]
impl ObjectRefStore for StorageObjectRepository {
    async fn acquire(&self, location: &str, sha256: &str, size_bytes: i64) -> AppResult<i64> {
        Self::acquire(self, location, sha256, size_bytes).await
    }

    async fn release(&self, location: &str) -> AppResult<i64> {
        Self::release(self, location).await
    }

    async fn reclaim(&self, location: &str, blobs: &dyn StorageBackend) -> AppResult<bool> {
        Self::reclaim(self, location, || blobs.delete(location)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(origin: &str, id: &str, age_days: i64) -> media::Model {
        media::Model {
            origin: origin.to_string(),
            media_id: id.to_string(),
            upload_name: None,
            content_type: "image/png".to_string(),
            size_bytes: 1,
            sha256: "00".repeat(32),
            location: "00/00/00".to_string(),
            user_id: "@alice:local.test".to_string(),
            quarantined: false,
            created_at: (Utc::now() - Duration::days(age_days)).into(),
        }
    }

    #[test]
    fn test_remote_before_excludes_local_and_new() {
        let selection = MediaSelection::RemoteBefore {
            local_origin: "local.test".to_string(),
            before: Utc::now() - Duration::days(1),
        };
        assert!(selection.matches(&record("remote.test", "a", 2)));
        assert!(!selection.matches(&record("local.test", "a", 2)));
        assert!(!selection.matches(&record("remote.test", "a", 0)));
    }

    #[test]
    fn test_quarantined_with_origin() {
        let mut quarantined = record("local.test", "a", 0);
        quarantined.quarantined = true;
        let selection = MediaSelection::Quarantined {
            origin: Some("local.test".to_string()),
        };
        assert!(selection.matches(&quarantined));
        quarantined.origin = "remote.test".to_string();
        assert!(!selection.matches(&quarantined));
        assert!(MediaSelection::Quarantined { origin: None }.matches(&quarantined));
    }

    #[test]
    fn test_before_respects_include_local() {
        let before = Utc::now() - Duration::days(1);
        let without = MediaSelection::Before {
            before,
            include_local: false,
            local_origin: "local.test".to_string(),
        };
        let with = MediaSelection::Before {
            before,
            include_local: true,
            local_origin: "local.test".to_string(),
        };
        let local = record("local.test", "a", 3);
        assert!(!without.matches(&local));
        assert!(with.matches(&local));
    }

    #[test]
    fn test_refs_match_exactly() {
        let selection = MediaSelection::Refs(vec![MediaRef::new("local.test", "a")]);
        assert!(selection.matches(&record("local.test", "a", 0)));
        assert!(!selection.matches(&record("local.test", "b", 0)));
    }
}
