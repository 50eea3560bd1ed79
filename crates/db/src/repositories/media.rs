//! Media repository.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mediarepo_common::{AppError, AppResult, MediaRef};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::debug;

use super::storage_object::release_reference;
use crate::entities::{Media, Thumbnail, media, thumbnail};

/// Rows removed by a purge, plus the storage objects nobody references any
/// more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgedMedia {
    /// The media row that was deleted.
    pub media: media::Model,
    /// Its thumbnail rows, deleted with it.
    pub thumbnails: Vec<thumbnail::Model>,
    /// Locations whose reference count reached zero. The blobs behind them
    /// can be deleted.
    pub orphaned_locations: Vec<String>,
}

/// Media repository for database operations.
#[derive(Clone)]
pub struct MediaRepository {
    db: Arc<DatabaseConnection>,
}

impl MediaRepository {
    /// Create a new media repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a media record.
    pub async fn find(&self, origin: &str, media_id: &str) -> AppResult<Option<media::Model>> {
        Media::find_by_id((origin.to_string(), media_id.to_string()))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get a media record, returning an error if not found.
    pub async fn get(&self, origin: &str, media_id: &str) -> AppResult<media::Model> {
        self.find(origin, media_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Media: {origin}/{media_id}")))
    }

    /// Insert a new media record.
    pub async fn create(&self, model: media::ActiveModel) -> AppResult<media::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Set or clear the quarantine flag.
    pub async fn set_quarantined(
        &self,
        origin: &str,
        media_id: &str,
        quarantined: bool,
    ) -> AppResult<media::Model> {
        let record = self.get(origin, media_id).await?;
        if record.quarantined == quarantined {
            return Ok(record);
        }

        let mut active = record.into_active_model();
        active.quarantined = Set(quarantined);
        active
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Records from one origin created before `before`.
    pub async fn find_by_origin_before(
        &self,
        origin: &str,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<media::Model>> {
        self.find_where(
            Condition::all()
                .add(media::Column::Origin.eq(origin))
                .add(media::Column::CreatedAt.lt(before)),
        )
        .await
    }

    /// Records from every origin except `local_origin` created before `before`.
    pub async fn find_remote_before(
        &self,
        local_origin: &str,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<media::Model>> {
        self.find_where(
            Condition::all()
                .add(media::Column::Origin.ne(local_origin))
                .add(media::Column::CreatedAt.lt(before)),
        )
        .await
    }

    /// Quarantined records, optionally restricted to one origin.
    pub async fn find_quarantined(&self, origin: Option<&str>) -> AppResult<Vec<media::Model>> {
        let mut condition = Condition::all().add(media::Column::Quarantined.eq(true));
        if let Some(origin) = origin {
            condition = condition.add(media::Column::Origin.eq(origin));
        }
        self.find_where(condition).await
    }

    /// Records created before `before`. Local records are only included when
    /// `include_local` is set.
    pub async fn find_before(
        &self,
        before: DateTime<Utc>,
        include_local: bool,
        local_origin: &str,
    ) -> AppResult<Vec<media::Model>> {
        let mut condition = Condition::all().add(media::Column::CreatedAt.lt(before));
        if !include_local {
            condition = condition.add(media::Column::Origin.ne(local_origin));
        }
        self.find_where(condition).await
    }

    /// Records uploaded by `user_id` before `before`.
    pub async fn find_by_user_before(
        &self,
        user_id: &str,
        before: DateTime<Utc>,
    ) -> AppResult<Vec<media::Model>> {
        self.find_where(
            Condition::all()
                .add(media::Column::UserId.eq(user_id))
                .add(media::Column::CreatedAt.lt(before)),
        )
        .await
    }

    /// Records matching any of `refs`. Unknown references are skipped.
    pub async fn find_many(&self, refs: &[MediaRef]) -> AppResult<Vec<media::Model>> {
        if refs.is_empty() {
            return Ok(Vec::new());
        }

        let condition = refs.iter().fold(Condition::any(), |cond, r| {
            cond.add(
                Condition::all()
                    .add(media::Column::Origin.eq(r.origin.as_str()))
                    .add(media::Column::MediaId.eq(r.media_id.as_str())),
            )
        });
        self.find_where(condition).await
    }

    async fn find_where(&self, condition: Condition) -> AppResult<Vec<media::Model>> {
        Media::find()
            .filter(condition)
            .order_by_asc(media::Column::CreatedAt)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a media record and its thumbnails, releasing their storage
    /// references, in one transaction.
    ///
    /// Returns `None` when the record is already gone.
    pub async fn purge(&self, origin: &str, media_id: &str) -> AppResult<Option<PurgedMedia>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let Some(record) = Media::find_by_id((origin.to_string(), media_id.to_string()))
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let thumbnails = Thumbnail::find()
            .filter(thumbnail::Column::Origin.eq(origin))
            .filter(thumbnail::Column::MediaId.eq(media_id))
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Thumbnail::delete_many()
            .filter(thumbnail::Column::Origin.eq(origin))
            .filter(thumbnail::Column::MediaId.eq(media_id))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Media::delete_by_id((origin.to_string(), media_id.to_string()))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        // One reference per row, even when rows share a location.
        let mut orphaned_locations = Vec::new();
        let locations = std::iter::once(&record.location)
            .chain(thumbnails.iter().map(|t| &t.location));
        for location in locations {
            let remaining = release_reference(&txn, location)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            if remaining == 0 && !orphaned_locations.contains(location) {
                orphaned_locations.push(location.clone());
            }
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        debug!(
            origin = %origin,
            media_id = %media_id,
            thumbnails = thumbnails.len(),
            orphaned = orphaned_locations.len(),
            "Purged media record"
        );

        Ok(Some(PurgedMedia {
            media: record,
            thumbnails,
            orphaned_locations,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::storage_object;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_media(origin: &str, media_id: &str, location: &str) -> media::Model {
        media::Model {
            origin: origin.to_string(),
            media_id: media_id.to_string(),
            upload_name: Some("cat.png".to_string()),
            content_type: "image/png".to_string(),
            size_bytes: 1024,
            sha256: "ab".repeat(32),
            location: location.to_string(),
            user_id: "@alice:example.org".to_string(),
            quarantined: false,
            created_at: Utc::now().into(),
        }
    }

    fn exec(rows: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected: rows,
        }
    }

    #[tokio::test]
    async fn test_find_returns_record() {
        let record = create_test_media("example.org", "abc", "ab/ab/abab");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[record.clone()]])
                .into_connection(),
        );

        let repo = MediaRepository::new(db);
        let found = repo.find("example.org", "abc").await.unwrap();

        assert_eq!(found, Some(record));
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<media::Model>::new()])
                .into_connection(),
        );

        let repo = MediaRepository::new(db);
        let result = repo.get("example.org", "missing").await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_find_many_empty_input_skips_query() {
        let db = Arc::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let repo = MediaRepository::new(db);

        assert!(repo.find_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_purge_missing_record_returns_none() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<media::Model>::new()])
                .into_connection(),
        );

        let repo = MediaRepository::new(db);
        assert!(repo.purge("example.org", "gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_reports_orphaned_location() {
        let record = create_test_media("example.org", "abc", "ab/ab/abab");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[record.clone()]])
                .append_query_results([Vec::<thumbnail::Model>::new()])
                // delete thumbnails, delete media, decrement
                .append_exec_results([exec(0), exec(1), exec(1)])
                .append_query_results([[storage_object::Model {
                    location: "ab/ab/abab".to_string(),
                    sha256: "ab".repeat(32),
                    size_bytes: 1024,
                    ref_count: 0,
                    created_at: Utc::now().into(),
                }]])
                .into_connection(),
        );

        let repo = MediaRepository::new(db);
        let purged = repo.purge("example.org", "abc").await.unwrap().unwrap();

        assert_eq!(purged.media, record);
        assert!(purged.thumbnails.is_empty());
        assert_eq!(purged.orphaned_locations, vec!["ab/ab/abab".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_keeps_shared_location() {
        let record = create_test_media("example.org", "abc", "ab/ab/abab");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[record]])
                .append_query_results([Vec::<thumbnail::Model>::new()])
                .append_exec_results([exec(0), exec(1), exec(1)])
                .append_query_results([[storage_object::Model {
                    location: "ab/ab/abab".to_string(),
                    sha256: "ab".repeat(32),
                    size_bytes: 1024,
                    ref_count: 1,
                    created_at: Utc::now().into(),
                }]])
                .into_connection(),
        );

        let repo = MediaRepository::new(db);
        let purged = repo.purge("example.org", "abc").await.unwrap().unwrap();

        assert!(purged.orphaned_locations.is_empty());
    }
}
