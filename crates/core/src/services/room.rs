//! Room membership lookup for room purges.

use std::sync::Arc;

use async_trait::async_trait;
use mediarepo_common::{AppResult, MediaRef};

/// Resolves the media referenced from a room.
///
/// Rooms live in the homeserver, not here; deployments plug in a directory
/// that can ask it.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Media referenced in `room_id`.
    async fn media_in_room(&self, room_id: &str) -> AppResult<Vec<MediaRef>>;
}

/// Directory that knows no rooms.
#[derive(Debug, Clone, Default)]
pub struct NoOpRoomDirectory;

#[async_trait]
impl RoomDirectory for NoOpRoomDirectory {
    async fn media_in_room(&self, _room_id: &str) -> AppResult<Vec<MediaRef>> {
        Ok(Vec::new())
    }
}

/// Fixed room contents, for tests.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct StaticRoomDirectory {
    rooms: std::collections::HashMap<String, Vec<MediaRef>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl StaticRoomDirectory {
    /// Add a room.
    #[must_use]
    pub fn with_room(mut self, room_id: &str, media: Vec<MediaRef>) -> Self {
        self.rooms.insert(room_id.to_string(), media);
        self
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RoomDirectory for StaticRoomDirectory {
    async fn media_in_room(&self, room_id: &str) -> AppResult<Vec<MediaRef>> {
        Ok(self.rooms.get(room_id).cloned().unwrap_or_default())
    }
}

pub type RoomDirectoryService = Arc<dyn RoomDirectory>;
