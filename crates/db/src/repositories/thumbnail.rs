//! Thumbnail repository.

use std::sync::Arc;

use mediarepo_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, sea_query::OnConflict};

use crate::entities::{Thumbnail, thumbnail};

/// Identity of a thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailKey {
    pub origin: String,
    pub media_id: String,
    pub width: i32,
    pub height: i32,
    pub method: String,
    pub animated: bool,
    pub forced: bool,
}

impl ThumbnailKey {
    fn primary_key(&self) -> (String, String, i32, i32, String, bool, bool) {
        (
            self.origin.clone(),
            self.media_id.clone(),
            self.width,
            self.height,
            self.method.clone(),
            self.animated,
            self.forced,
        )
    }
}

/// Thumbnail repository for database operations.
#[derive(Clone)]
pub struct ThumbnailRepository {
    db: Arc<DatabaseConnection>,
}

impl ThumbnailRepository {
    /// Create a new thumbnail repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a thumbnail by identity.
    pub async fn find(&self, key: &ThumbnailKey) -> AppResult<Option<thumbnail::Model>> {
        Thumbnail::find_by_id(key.primary_key())
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert unless a row with the same identity exists.
    ///
    /// Returns the stored row and whether this call inserted it. When another
    /// writer got there first its row is returned unchanged.
    pub async fn insert_if_absent(
        &self,
        model: thumbnail::Model,
    ) -> AppResult<(thumbnail::Model, bool)> {
        let key = ThumbnailKey {
            origin: model.origin.clone(),
            media_id: model.media_id.clone(),
            width: model.width,
            height: model.height,
            method: model.method.clone(),
            animated: model.animated,
            forced: model.forced,
        };

        let inserted = Thumbnail::insert(thumbnail::ActiveModel::from(model).reset_all())
            .on_conflict(
                OnConflict::columns([
                    thumbnail::Column::Origin,
                    thumbnail::Column::MediaId,
                    thumbnail::Column::Width,
                    thumbnail::Column::Height,
                    thumbnail::Column::Method,
                    thumbnail::Column::Animated,
                    thumbnail::Column::Forced,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let stored = self
            .find(&key)
            .await?
            .ok_or_else(|| AppError::Database("thumbnail row missing after insert".to_string()))?;

        Ok((stored, inserted > 0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn create_test_thumbnail(location: &str) -> thumbnail::Model {
        thumbnail::Model {
            origin: "example.org".to_string(),
            media_id: "abc".to_string(),
            width: 96,
            height: 96,
            method: "crop".to_string(),
            animated: false,
            forced: false,
            content_type: "image/png".to_string(),
            size_bytes: 512,
            rendered_width: 96,
            rendered_height: 96,
            sha256: "cd".repeat(32),
            location: location.to_string(),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_reports_existing_row() {
        let existing = create_test_thumbnail("cd/cd/first");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([[existing.clone()]])
                .into_connection(),
        );

        let repo = ThumbnailRepository::new(db);
        let (stored, inserted) = repo
            .insert_if_absent(create_test_thumbnail("cd/cd/second"))
            .await
            .unwrap();

        assert!(!inserted);
        assert_eq!(stored.location, "cd/cd/first");
    }

    #[tokio::test]
    async fn test_find_by_forced_key() {
        let thumb = thumbnail::Model {
            forced: true,
            rendered_width: 64,
            rendered_height: 48,
            ..create_test_thumbnail("cd/cd/forced")
        };
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[thumb.clone()]])
                .into_connection(),
        );

        let repo = ThumbnailRepository::new(db);
        let key = ThumbnailKey {
            origin: "example.org".to_string(),
            media_id: "abc".to_string(),
            width: 96,
            height: 96,
            method: "crop".to_string(),
            animated: false,
            forced: true,
        };
        let found = repo.find(&key).await.unwrap().unwrap();

        assert!(found.forced);
        assert_eq!((found.rendered_width, found.rendered_height), (64, 48));
    }
}
