//! Blob storage backends.

use async_trait::async_trait;
use mediarepo_common::{AppError, AppResult};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Storage backend trait for blob operations.
///
/// Keys are relative, slash-separated paths such as `ab/cd/abcd...`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write `data` under `key`. Readers never observe a partial write.
    async fn save(&self, key: &str, data: &[u8]) -> AppResult<()>;

    /// Read the blob stored under `key`.
    async fn read(&self, key: &str) -> AppResult<Vec<u8>>;

    /// Size of the blob in bytes.
    async fn size(&self, key: &str) -> AppResult<u64>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Check if a blob exists.
    async fn exists(&self, key: &str) -> AppResult<bool>;
}

/// Local filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_path(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(AppError::Storage(format!("invalid storage key: {key}")));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn save(&self, key: &str, data: &[u8]) -> AppResult<()> {
        let path = self.get_path(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("Failed to create directory: {e}")))?;
        }

        // Write beside the target, then rename over it.
        let temp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&temp, data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AppError::Storage(format!("Failed to write file: {e}")));
        }
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(AppError::Storage(format!("Failed to move file into place: {e}")));
        }

        Ok(())
    }

    async fn read(&self, key: &str) -> AppResult<Vec<u8>> {
        let path = self.get_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::Storage(format!("Blob missing: {key}")))
            }
            Err(e) => Err(AppError::Storage(format!("Failed to read file: {e}"))),
        }
    }

    async fn size(&self, key: &str) -> AppResult<u64> {
        let path = self.get_path(key)?;
        tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .map_err(|e| AppError::Storage(format!("Failed to stat {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let path = self.get_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("Failed to delete file: {e}"))),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.get_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to stat {key}: {e}")))
    }
}

/// In-memory storage backend for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, std::collections::HashMap<String, Vec<u8>>> {
        self.blobs
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }

    /// Whether `key` is stored.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs().contains_key(key)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save(&self, key: &str, data: &[u8]) -> AppResult<()> {
        self.blobs().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> AppResult<Vec<u8>> {
        self.blobs()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("Blob missing: {key}")))
    }

    async fn size(&self, key: &str) -> AppResult<u64> {
        self.blobs()
            .get(key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| AppError::Storage(format!("Blob missing: {key}")))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.blobs().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(self.blobs().contains_key(key))
    }
}

/// Type alias for the storage service.
pub type StorageService = Arc<dyn StorageBackend>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("mediarepo-storage-{}", uuid::Uuid::new_v4().simple()))
    }

    #[tokio::test]
    async fn test_local_round_trip_and_delete() {
        let root = temp_root();
        let storage = LocalStorage::new(&root);

        storage.save("ab/cd/abcd", b"hello").await.unwrap();
        assert!(storage.exists("ab/cd/abcd").await.unwrap());
        assert_eq!(storage.read("ab/cd/abcd").await.unwrap(), b"hello");
        assert_eq!(storage.size("ab/cd/abcd").await.unwrap(), 5);

        storage.delete("ab/cd/abcd").await.unwrap();
        assert!(!storage.exists("ab/cd/abcd").await.unwrap());
        // second delete is a no-op
        storage.delete("ab/cd/abcd").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_local_leaves_no_temp_files() {
        let root = temp_root();
        let storage = LocalStorage::new(&root);
        storage.save("ab/cd/abcd", b"one").await.unwrap();
        storage.save("ab/cd/abcd", b"two").await.unwrap();

        let mut entries = tokio::fs::read_dir(root.join("ab/cd")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["abcd".to_string()]);
        assert_eq!(storage.read("ab/cd/abcd").await.unwrap(), b"two");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn test_local_rejects_escaping_keys() {
        let storage = LocalStorage::new(temp_root());
        assert!(matches!(
            storage.save("../etc/passwd", b"x").await,
            Err(AppError::Storage(_))
        ));
        assert!(matches!(
            storage.read("/absolute").await,
            Err(AppError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_blob_is_storage_error() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.read("nothing").await,
            Err(AppError::Storage(_))
        ));
    }
}
