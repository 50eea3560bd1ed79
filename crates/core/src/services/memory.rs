//! In-memory metadata stores and clock for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use mediarepo_common::{AppError, AppResult};
use mediarepo_db::entities::{media, thumbnail, url_preview};
use mediarepo_db::repositories::{PurgedMedia, ThumbnailKey};

use super::coalesce::Clock;
use super::storage::StorageBackend;
use super::stores::{MediaSelection, MediaStore, ObjectRefStore, PreviewStore, ThumbnailStore};

type ThumbnailId = (String, String, i32, i32, String, bool, bool);

fn thumbnail_id(key: &ThumbnailKey) -> ThumbnailId {
    (
        key.origin.clone(),
        key.media_id.clone(),
        key.width,
        key.height,
        key.method.clone(),
        key.animated,
        key.forced,
    )
}

fn record_id(record: &thumbnail::Model) -> ThumbnailId {
    (
        record.origin.clone(),
        record.media_id.clone(),
        record.width,
        record.height,
        record.method.clone(),
        record.animated,
        record.forced,
    )
}

#[derive(Default)]
struct State {
    media: BTreeMap<(String, String), media::Model>,
    thumbnails: BTreeMap<ThumbnailId, thumbnail::Model>,
    previews: HashMap<(String, i64), url_preview::Model>,
    objects: HashMap<String, i64>,
    preview_writes: usize,
}

impl State {
    fn release(&mut self, location: &str) -> i64 {
        match self.objects.get_mut(location) {
            Some(count) => {
                *count = (*count - 1).max(0);
                *count
            }
            None => 0,
        }
    }
}

/// All metadata stores behind one lock.
///
/// `object_guard` serializes `acquire` against `reclaim` the way a row lock
/// does in the database, and is held across the blob delete.
#[derive(Default)]
pub struct MemoryMetadata {
    state: Mutex<State>,
    object_guard: tokio::sync::Mutex<()>,
}

impl MemoryMetadata {
    /// Create empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current reference count of a location, zero when unknown.
    #[must_use]
    pub fn ref_count(&self, location: &str) -> i64 {
        self.state().objects.get(location).copied().unwrap_or(0)
    }

    /// Number of media records.
    #[must_use]
    pub fn media_count(&self) -> usize {
        self.state().media.len()
    }

    /// Number of thumbnail records.
    #[must_use]
    pub fn thumbnail_count(&self) -> usize {
        self.state().thumbnails.len()
    }

    /// Number of preview rows actually written.
    #[must_use]
    pub fn preview_writes(&self) -> usize {
        self.state().preview_writes
    }

    /// Stored preview rows for `url`, any bucket.
    #[must_use]
    pub fn previews_for(&self, url: &str) -> Vec<url_preview::Model> {
        self.state()
            .previews
            .values()
            .filter(|p| p.url == url)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MediaStore for MemoryMetadata {
    async fn find(&self, origin: &str, media_id: &str) -> AppResult<Option<media::Model>> {
        Ok(self
            .state()
            .media
            .get(&(origin.to_string(), media_id.to_string()))
            .cloned())
    }

    async fn insert(&self, record: media::Model) -> AppResult<media::Model> {
        let mut state = self.state();
        let id = (record.origin.clone(), record.media_id.clone());
        if state.media.contains_key(&id) {
            return Err(AppError::Database(format!(
                "duplicate media record: {}/{}",
                id.0, id.1
            )));
        }
        state.media.insert(id, record.clone());
        Ok(record)
    }

    async fn set_quarantined(
        &self,
        origin: &str,
        media_id: &str,
        quarantined: bool,
    ) -> AppResult<media::Model> {
        let mut state = self.state();
        let record = state
            .media
            .get_mut(&(origin.to_string(), media_id.to_string()))
            .ok_or_else(|| AppError::NotFound(format!("Media: {origin}/{media_id}")))?;
        record.quarantined = quarantined;
        Ok(record.clone())
    }

    async fn select(&self, selection: &MediaSelection) -> AppResult<Vec<media::Model>> {
        let mut found: Vec<media::Model> = self
            .state()
            .media
            .values()
            .filter(|record| selection.matches(record))
            .cloned()
            .collect();
        found.sort_by_key(|record| record.created_at);
        Ok(found)
    }

    async fn purge(&self, origin: &str, media_id: &str) -> AppResult<Option<PurgedMedia>> {
        let mut state = self.state();
        let Some(record) = state
            .media
            .remove(&(origin.to_string(), media_id.to_string()))
        else {
            return Ok(None);
        };

        let ids: Vec<ThumbnailId> = state
            .thumbnails
            .keys()
            .filter(|id| id.0 == origin && id.1 == media_id)
            .cloned()
            .collect();
        let thumbnails: Vec<thumbnail::Model> = ids
            .iter()
            .filter_map(|id| state.thumbnails.remove(id))
            .collect();

        let mut orphaned_locations = Vec::new();
        let locations: Vec<String> = std::iter::once(record.location.clone())
            .chain(thumbnails.iter().map(|t| t.location.clone()))
            .collect();
        for location in locations {
            if state.release(&location) == 0 && !orphaned_locations.contains(&location) {
                orphaned_locations.push(location);
            }
        }

        Ok(Some(PurgedMedia {
            media: record,
            thumbnails,
            orphaned_locations,
        }))
    }
}

#[async_trait]
impl ThumbnailStore for MemoryMetadata {
    async fn find(&self, key: &ThumbnailKey) -> AppResult<Option<thumbnail::Model>> {
        Ok(self.state().thumbnails.get(&thumbnail_id(key)).cloned())
    }

    async fn insert_if_absent(
        &self,
        record: thumbnail::Model,
    ) -> AppResult<(thumbnail::Model, bool)> {
        let mut state = self.state();
        let id = record_id(&record);
        if let Some(existing) = state.thumbnails.get(&id) {
            return Ok((existing.clone(), false));
        }
        state.thumbnails.insert(id, record.clone());
        Ok((record, true))
    }
}

#[async_trait]
impl PreviewStore for MemoryMetadata {
    async fn find(&self, url: &str, bucket_ts: i64) -> AppResult<Option<url_preview::Model>> {
        Ok(self
            .state()
            .previews
            .get(&(url.to_string(), bucket_ts))
            .cloned())
    }

    async fn insert_if_absent(&self, record: url_preview::Model) -> AppResult<url_preview::Model> {
        let mut state = self.state();
        let id = (record.url.clone(), record.bucket_ts);
        if let Some(existing) = state.previews.get(&id) {
            return Ok(existing.clone());
        }
        state.preview_writes += 1;
        state.previews.insert(id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl ObjectRefStore for MemoryMetadata {
    async fn acquire(&self, location: &str, _sha256: &str, _size_bytes: i64) -> AppResult<i64> {
        let _guard = self.object_guard.lock().await;
        let mut state = self.state();
        let count = state.objects.entry(location.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn release(&self, location: &str) -> AppResult<i64> {
        Ok(self.state().release(location))
    }

    async fn reclaim(&self, location: &str, blobs: &dyn StorageBackend) -> AppResult<bool> {
        let _guard = self.object_guard.lock().await;
        if self.state().objects.get(location) != Some(&0) {
            return Ok(false);
        }
        blobs.delete(location).await?;
        self.state().objects.remove(location);
        Ok(true)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    /// Start at `now_ms`.
    #[must_use]
    pub const fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    /// Jump to `now_ms`.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
