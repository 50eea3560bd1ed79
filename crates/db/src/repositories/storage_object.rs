//! Storage object repository: reference counting for content-addressed blobs.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use mediarepo_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
    sea_query::{Expr, OnConflict},
};

use crate::entities::{StorageObject, storage_object};

/// Decrement the reference count of `location` on `conn`. Returns the
/// remaining count.
///
/// A row that reaches zero is kept; only [`StorageObjectRepository::reclaim`]
/// removes it, together with the blob. An unknown location counts as already
/// released.
pub(crate) async fn release_reference<C: ConnectionTrait>(
    conn: &C,
    location: &str,
) -> Result<i64, DbErr> {
    StorageObject::update_many()
        .col_expr(
            storage_object::Column::RefCount,
            Expr::col(storage_object::Column::RefCount).sub(1),
        )
        .filter(storage_object::Column::Location.eq(location))
        .filter(storage_object::Column::RefCount.gt(0))
        .exec(conn)
        .await?;

    let remaining = StorageObject::find_by_id(location.to_string())
        .one(conn)
        .await?
        .map_or(0, |object| object.ref_count);

    Ok(remaining.max(0))
}

/// Storage object repository for database operations.
#[derive(Clone)]
pub struct StorageObjectRepository {
    db: Arc<DatabaseConnection>,
}

impl StorageObjectRepository {
    /// Create a new storage object repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find the row for a location.
    pub async fn find(&self, location: &str) -> AppResult<Option<storage_object::Model>> {
        StorageObject::find_by_id(location.to_string())
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Add one reference to `location`, creating the row on first use.
    /// Returns the new count.
    pub async fn acquire(&self, location: &str, sha256: &str, size_bytes: i64) -> AppResult<i64> {
        let model = storage_object::ActiveModel {
            location: Set(location.to_string()),
            sha256: Set(sha256.to_string()),
            size_bytes: Set(size_bytes),
            ref_count: Set(1),
            created_at: Set(Utc::now().into()),
        };

        StorageObject::insert(model)
            .on_conflict(
                OnConflict::column(storage_object::Column::Location)
                    .value(
                        storage_object::Column::RefCount,
                        Expr::col((StorageObject, storage_object::Column::RefCount)).add(1),
                    )
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        self.find(location)
            .await?
            .map(|object| object.ref_count)
            .ok_or_else(|| AppError::Database(format!("storage object vanished: {location}")))
    }

    /// Drop one reference to `location`. Returns the remaining count.
    pub async fn release(&self, location: &str) -> AppResult<i64> {
        release_reference(self.db.as_ref(), location)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Remove an unreferenced location.
    ///
    /// The row is locked `FOR UPDATE` and its count re-checked; `delete_blob`
    /// runs and the row is deleted only while the count is still zero. A
    /// concurrent [`acquire`](Self::acquire) blocks on the lock until the
    /// transaction ends, then starts a fresh row and writes the blob again.
    /// Returns whether the location was removed.
    pub async fn reclaim<F, Fut>(&self, location: &str, delete_blob: F) -> AppResult<bool>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<()>> + Send,
    {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let object = StorageObject::find_by_id(location.to_string())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        if !object.is_some_and(|o| o.ref_count <= 0) {
            txn.rollback()
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
            return Ok(false);
        }

        delete_blob().await?;

        StorageObject::delete_many()
            .filter(storage_object::Column::Location.eq(location))
            .filter(storage_object::Column::RefCount.lte(0))
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn object(count: i64) -> storage_object::Model {
        storage_object::Model {
            location: "ab/cd/abcd".to_string(),
            sha256: "abcd".to_string(),
            size_bytes: 10,
            ref_count: count,
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
    async fn test_acquire_returns_new_count() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1)])
                .append_query_results([[object(2)]])
                .into_connection(),
        );

        let repo = StorageObjectRepository::new(db);
        assert_eq!(repo.acquire("ab/cd/abcd", "abcd", 10).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_release_keeps_row_while_referenced() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1)])
                .append_query_results([[object(1)]])
                .into_connection(),
        );

        let repo = StorageObjectRepository::new(db);
        assert_eq!(repo.release("ab/cd/abcd").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_to_zero_keeps_row() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(1)])
                .append_query_results([[object(0)]])
                .into_connection(),
        );

        // No exec result is queued for a DELETE, so one would fail here.
        let repo = StorageObjectRepository::new(db);
        assert_eq!(repo.release("ab/cd/abcd").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reclaim_skips_referenced_location() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[object(1)]])
                .into_connection(),
        );

        let repo = StorageObjectRepository::new(db);
        let deleted = AtomicBool::new(false);
        let reclaimed = repo
            .reclaim("ab/cd/abcd", || async {
                deleted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert!(!reclaimed);
        assert!(!deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reclaim_deletes_unreferenced_location() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[object(0)]])
                .append_exec_results([exec(1)])
                .into_connection(),
        );

        let repo = StorageObjectRepository::new(db);
        let deleted = AtomicBool::new(false);
        let reclaimed = repo
            .reclaim("ab/cd/abcd", || async {
                deleted.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert!(reclaimed);
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_of_unknown_location_is_zero() {
        let db = Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([exec(0)])
                .append_query_results([Vec::<storage_object::Model>::new()])
                .into_connection(),
        );

        let repo = StorageObjectRepository::new(db);
        assert_eq!(repo.release("nowhere").await.unwrap(), 0);
    }
}
