//! Media upload, lookup and quarantine.

use std::sync::Arc;

use chrono::Utc;
use mediarepo_common::config::UploadConfig;
use mediarepo_common::{AppError, AppResult, IdGenerator};
use mediarepo_db::entities::media;
use serde::Serialize;
use tracing::{info, warn};

use super::auth::{AuthContext, Tier};
use super::derivative::DerivativeStore;
use super::stores::MediaStore;

/// A new upload.
#[derive(Debug, Clone)]
pub struct UploadInput {
    pub user_id: String,
    pub upload_name: Option<String>,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Client-visible media settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicConfig {
    /// Largest accepted upload in bytes; absent when unlimited.
    #[serde(rename = "m.upload.size", skip_serializing_if = "Option::is_none")]
    pub upload_size: Option<i64>,
}

/// Media record management.
#[derive(Clone)]
pub struct MediaService {
    media: Arc<dyn MediaStore>,
    store: DerivativeStore,
    id_gen: IdGenerator,
    local_origin: String,
    uploads: UploadConfig,
}

impl MediaService {
    /// Create a media service for the server named `local_origin`.
    pub fn new(
        media: Arc<dyn MediaStore>,
        store: DerivativeStore,
        local_origin: impl Into<String>,
        uploads: UploadConfig,
    ) -> Self {
        Self {
            media,
            store,
            id_gen: IdGenerator::new(),
            local_origin: local_origin.into(),
            uploads,
        }
    }

    /// Name of the server this repository serves.
    #[must_use]
    pub fn local_origin(&self) -> &str {
        &self.local_origin
    }

    /// Store an upload as a new local media record.
    pub async fn upload(&self, input: UploadInput) -> AppResult<media::Model> {
        if input.bytes.is_empty() {
            return Err(AppError::Validation("upload is empty".to_string()));
        }
        let size = i64::try_from(input.bytes.len()).unwrap_or(i64::MAX);
        if self.uploads.max_size_bytes >= 0 && size > self.uploads.max_size_bytes {
            return Err(AppError::Validation(format!(
                "upload of {size} bytes exceeds the limit of {} bytes",
                self.uploads.max_size_bytes
            )));
        }

        let stored = self.store.persist(&input.bytes).await?;
        let record = media::Model {
            origin: self.local_origin.clone(),
            media_id: self.id_gen.generate(),
            upload_name: input.upload_name,
            content_type: input.content_type,
            size_bytes: stored.size_bytes,
            sha256: stored.sha256,
            location: stored.location.clone(),
            user_id: input.user_id,
            quarantined: false,
            created_at: Utc::now().into(),
        };

        match self.media.insert(record).await {
            Ok(record) => {
                info!(
                    origin = %record.origin,
                    media_id = %record.media_id,
                    size = record.size_bytes,
                    "Stored upload"
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(release_err) = self.store.release(&stored.location).await {
                    warn!(location = %stored.location, error = %release_err, "Failed to release blob of failed upload");
                }
                Err(e)
            }
        }
    }

    /// Get a media record.
    pub async fn get(&self, origin: &str, media_id: &str) -> AppResult<media::Model> {
        self.media
            .find(origin, media_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Media: {origin}/{media_id}")))
    }

    /// Get a record and its bytes. Quarantined media is only visible to
    /// administrators of its origin.
    pub async fn download(
        &self,
        origin: &str,
        media_id: &str,
        caller: Option<&AuthContext>,
    ) -> AppResult<(media::Model, Vec<u8>)> {
        let record = self.get(origin, media_id).await?;
        if record.quarantined && !caller.is_some_and(|c| c.administers(origin)) {
            return Err(AppError::NotFound(format!("Media: {origin}/{media_id}")));
        }
        let bytes = self.read(&record).await?;
        Ok((record, bytes))
    }

    /// Bytes of a record.
    pub async fn read(&self, record: &media::Model) -> AppResult<Vec<u8>> {
        self.store.read(&record.location).await
    }

    /// Set or clear the quarantine flag.
    pub async fn set_quarantine(
        &self,
        origin: &str,
        media_id: &str,
        quarantined: bool,
        caller: &AuthContext,
    ) -> AppResult<media::Model> {
        caller.require(Tier::LocalAdmin)?;
        if !caller.administers(origin) {
            return Err(AppError::Forbidden(format!(
                "no authority over media from {origin}"
            )));
        }

        let record = self
            .media
            .set_quarantined(origin, media_id, quarantined)
            .await?;
        info!(origin = %origin, media_id = %media_id, quarantined, "Changed quarantine flag");
        Ok(record)
    }

    /// Settings clients may see.
    #[must_use]
    pub fn public_config(&self) -> PublicConfig {
        PublicConfig {
            upload_size: self.uploads.public_max_size(),
        }
    }
}
