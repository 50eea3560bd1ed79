//! URL preview repository.

use std::sync::Arc;

use mediarepo_common::{AppError, AppResult};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, sea_query::OnConflict};

use crate::entities::{UrlPreview, url_preview};

/// URL preview repository for database operations.
#[derive(Clone)]
pub struct UrlPreviewRepository {
    db: Arc<DatabaseConnection>,
}

impl UrlPreviewRepository {
    /// Create a new URL preview repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the cached preview of `url` for a bucket.
    pub async fn find(&self, url: &str, bucket_ts: i64) -> AppResult<Option<url_preview::Model>> {
        UrlPreview::find_by_id((url.to_string(), bucket_ts))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert unless the bucket already has a row; the stored row is returned
    /// either way.
    pub async fn insert_if_absent(&self, model: url_preview::Model) -> AppResult<url_preview::Model> {
        let url = model.url.clone();
        let bucket_ts = model.bucket_ts;

        UrlPreview::insert(url_preview::ActiveModel::from(model).reset_all())
            .on_conflict(
                OnConflict::columns([url_preview::Column::Url, url_preview::Column::BucketTs])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find(&url, bucket_ts)
            .await?
            .ok_or_else(|| AppError::Database("url preview row missing after insert".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn cached_error(url: &str, bucket_ts: i64, code: &str) -> url_preview::Model {
        url_preview::Model {
            url: url.to_string(),
            bucket_ts,
            error_code: Some(code.to_string()),
            title: None,
            description: None,
            site_name: None,
            canonical_url: None,
            image_ref: None,
            image_content_type: None,
            image_size_bytes: None,
            image_width: None,
            image_height: None,
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_find_by_url_and_bucket() {
        let row = cached_error("https://example.com/", 3_600_000, "not_found");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[row.clone()]])
                .into_connection(),
        );

        let repo = UrlPreviewRepository::new(db);
        let found = repo.find("https://example.com/", 3_600_000).await.unwrap();

        assert_eq!(found, Some(row));
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let first = cached_error("https://example.com/", 0, "upstream");
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([[first.clone()]])
                .into_connection(),
        );

        let repo = UrlPreviewRepository::new(db);
        let stored = repo
            .insert_if_absent(cached_error("https://example.com/", 0, "not_found"))
            .await
            .unwrap();

        assert_eq!(stored.error_code.as_deref(), Some("upstream"));
    }
}
