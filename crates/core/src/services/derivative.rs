//! Content-addressed blob storage with reference counting.
//!
//! Identical bytes land at the same location, `ab/cd/<sha256>`, and share one
//! blob. Every media or thumbnail row pointing at a location holds one
//! reference; the blob is deleted when the last reference goes. Deletion
//! re-checks the count under the guard `acquire` takes, so a blob that was
//! re-referenced in the meantime stays.

use std::sync::Arc;

use mediarepo_common::{AppError, AppResult};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use super::storage::StorageService;
use super::stores::ObjectRefStore;

/// A persisted blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Storage key.
    pub location: String,
    /// Lowercase hex SHA-256 of the bytes.
    pub sha256: String,
    /// Length in bytes.
    pub size_bytes: i64,
}

/// Storage location for a content hash.
#[must_use]
pub fn content_location(sha256_hex: &str) -> String {
    if sha256_hex.len() < 4 {
        return sha256_hex.to_string();
    }
    format!("{}/{}/{}", &sha256_hex[..2], &sha256_hex[2..4], sha256_hex)
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Deduplicating blob store.
#[derive(Clone)]
pub struct DerivativeStore {
    blobs: StorageService,
    refs: Arc<dyn ObjectRefStore>,
}

impl DerivativeStore {
    /// Create a store over a blob backend and a reference counter.
    #[must_use]
    pub fn new(blobs: StorageService, refs: Arc<dyn ObjectRefStore>) -> Self {
        Self { blobs, refs }
    }

    /// Store `data` and take one reference to its location.
    ///
    /// The caller owns that reference and must either record it on a row or
    /// hand it back with [`release`](Self::release).
    pub async fn persist(&self, data: &[u8]) -> AppResult<StoredObject> {
        let sha256 = sha256_hex(data);
        let location = content_location(&sha256);
        let size_bytes = i64::try_from(data.len())
            .map_err(|_| AppError::Storage("blob too large".to_string()))?;

        let count = self.refs.acquire(&location, &sha256, size_bytes).await?;

        let present = count > 1 && self.blobs.exists(&location).await.unwrap_or(false);
        if present {
            debug!(location = %location, refs = count, "Reusing stored blob");
        } else if let Err(e) = self.blobs.save(&location, data).await {
            error!(location = %location, error = %e, "Failed to write blob");
            if let Err(release_err) = self.release(&location).await {
                warn!(location = %location, error = %release_err, "Failed to roll back blob reference");
            }
            return Err(e);
        }

        Ok(StoredObject {
            location,
            sha256,
            size_bytes,
        })
    }

    /// Read a blob.
    pub async fn read(&self, location: &str) -> AppResult<Vec<u8>> {
        self.blobs.read(location).await
    }

    /// Size of a blob as stored.
    pub async fn size(&self, location: &str) -> AppResult<i64> {
        let size = self.blobs.size(location).await?;
        i64::try_from(size).map_err(|_| AppError::Storage("blob too large".to_string()))
    }

    /// Drop one reference, deleting the blob if it was the last.
    /// Returns whether the blob was deleted.
    pub async fn release(&self, location: &str) -> AppResult<bool> {
        let remaining = self.refs.release(location).await?;
        if remaining > 0 {
            return Ok(false);
        }
        self.refs.reclaim(location, self.blobs.as_ref()).await
    }

    /// Delete blobs whose references were already dropped elsewhere.
    ///
    /// A location referenced again since then is kept. Failures are logged
    /// and skipped; the returned count covers the blobs actually deleted.
    pub async fn delete_orphans(&self, locations: &[String]) -> usize {
        let mut deleted = 0;
        for location in locations {
            match self.refs.reclaim(location, self.blobs.as_ref()).await {
                Ok(true) => deleted += 1,
                Ok(false) => debug!(location = %location, "Orphan referenced again, keeping blob"),
                Err(e) => error!(location = %location, error = %e, "Failed to delete orphaned blob"),
            }
        }
        deleted
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryMetadata;
    use crate::services::storage::MemoryStorage;

    fn store() -> (DerivativeStore, MemoryStorage, Arc<MemoryMetadata>) {
        let blobs = MemoryStorage::new();
        let meta = Arc::new(MemoryMetadata::new());
        (
            DerivativeStore::new(Arc::new(blobs.clone()), meta.clone()),
            blobs,
            meta,
        )
    }

    #[test]
    fn test_content_location_shards_by_prefix() {
        let sha = sha256_hex(b"hello");
        assert_eq!(
            content_location(&sha),
            format!("2c/f2/{sha}"),
            "sha256(hello) starts with 2cf2"
        );
    }

    #[tokio::test]
    async fn test_identical_bytes_share_one_blob() {
        let (store, blobs, meta) = store();

        let first = store.persist(b"same bytes").await.unwrap();
        let second = store.persist(b"same bytes").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(blobs.len(), 1);
        assert_eq!(meta.ref_count(&first.location), 2);
    }

    #[tokio::test]
    async fn test_blob_survives_until_last_release() {
        let (store, blobs, _meta) = store();
        let stored = store.persist(b"shared").await.unwrap();
        store.persist(b"shared").await.unwrap();

        assert!(!store.release(&stored.location).await.unwrap());
        assert!(blobs.contains(&stored.location));

        assert!(store.release(&stored.location).await.unwrap());
        assert!(!blobs.contains(&stored.location));
    }

    #[tokio::test]
    async fn test_delete_orphans_counts_deleted() {
        let (store, blobs, meta) = store();
        let stored = store.persist(b"x").await.unwrap();
        ObjectRefStore::release(meta.as_ref(), &stored.location)
            .await
            .unwrap();

        assert_eq!(store.delete_orphans(&[stored.location.clone()]).await, 1);
        assert!(blobs.is_empty());
    }

    #[tokio::test]
    async fn test_delete_orphans_keeps_rereferenced_blob() {
        let (store, blobs, meta) = store();
        let stored = store.persist(b"x").await.unwrap();
        ObjectRefStore::release(meta.as_ref(), &stored.location)
            .await
            .unwrap();
        let again = store.persist(b"x").await.unwrap();

        assert_eq!(store.delete_orphans(&[stored.location.clone()]).await, 0);
        assert!(blobs.contains(&again.location));
        assert_eq!(meta.ref_count(&again.location), 1);
        assert_eq!(store.read(&again.location).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_reclaim_skips_referenced_location() {
        let (store, blobs, meta) = store();
        let stored = store.persist(b"held").await.unwrap();

        assert!(
            !ObjectRefStore::reclaim(meta.as_ref(), &stored.location, &blobs)
                .await
                .unwrap()
        );
        assert!(blobs.contains(&stored.location));
    }
}
