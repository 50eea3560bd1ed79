//! Authorization-scoped media purging.
//!
//! Every scope names a minimum authority tier and, for lesser admins, a
//! pre-filter that keeps them inside their own origin. Authorization is
//! settled before any record is touched. Each matched record is removed in
//! its own transaction; blobs whose last reference went with it are deleted
//! after that transaction commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mediarepo_common::{AppError, AppResult, MediaRef, user_server};
use mediarepo_db::entities::media;
use tracing::{info, warn};

use super::auth::{AuthContext, Tier};
use super::derivative::DerivativeStore;
use super::room::RoomDirectory;
use super::stores::{MediaSelection, MediaStore};

/// What to purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeScope {
    /// One record.
    Single { origin: String, media_id: String },
    /// Everything from one origin older than `before`.
    Origin {
        origin: String,
        before: DateTime<Utc>,
    },
    /// Everything from other servers older than `before`.
    Remote { before: DateTime<Utc> },
    /// Quarantined media, optionally from one origin.
    Quarantined { origin: Option<String> },
    /// Everything older than `before`; local media only with `include_local`.
    Old {
        before: DateTime<Utc>,
        include_local: bool,
    },
    /// One user's uploads older than `before`.
    User {
        user_id: String,
        before: DateTime<Utc>,
    },
    /// Exactly these records, optionally only those older than `before`.
    Explicit {
        refs: Vec<MediaRef>,
        before: Option<DateTime<Utc>>,
    },
}

impl PurgeScope {
    /// Weakest tier allowed to request this scope.
    #[must_use]
    pub const fn minimum_tier(&self) -> Tier {
        match self {
            Self::Single { .. } | Self::User { .. } => Tier::Owner,
            Self::Origin { .. } | Self::Quarantined { .. } | Self::Explicit { .. } => {
                Tier::LocalAdmin
            }
            Self::Remote { .. } | Self::Old { .. } => Tier::GlobalAdmin,
        }
    }
}

/// A scope narrowed to what the caller may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AuthorizedPurge {
    selection: MediaSelection,
    before: Option<DateTime<Utc>>,
}

fn forbidden(msg: impl Into<String>) -> AppError {
    AppError::Forbidden(msg.into())
}

/// Check `caller` against `scope` and narrow it. Owner checks on a single
/// record happen later, once the record is loaded.
fn authorize(
    scope: PurgeScope,
    caller: &AuthContext,
    local_origin: &str,
) -> AppResult<AuthorizedPurge> {
    caller.require(scope.minimum_tier())?;

    let selection = match scope {
        PurgeScope::Single { origin, media_id } => {
            if let AuthContext::LocalAdmin { origin: own, .. } = caller
                && *own != origin
            {
                return Err(forbidden(format!("no authority over media from {origin}")));
            }
            MediaSelection::Refs(vec![MediaRef::new(origin, media_id)])
        }
        PurgeScope::Origin { origin, before } => {
            if !caller.administers(&origin) {
                return Err(forbidden(format!("no authority over media from {origin}")));
            }
            MediaSelection::OriginBefore { origin, before }
        }
        PurgeScope::Remote { before } => MediaSelection::RemoteBefore {
            local_origin: local_origin.to_string(),
            before,
        },
        PurgeScope::Quarantined { origin } => match caller {
            AuthContext::LocalAdmin { origin: own, .. } => match origin {
                Some(requested) if requested != *own => {
                    return Err(forbidden(format!(
                        "no authority over media from {requested}"
                    )));
                }
                _ => MediaSelection::Quarantined {
                    origin: Some(own.clone()),
                },
            },
            _ => MediaSelection::Quarantined { origin },
        },
        PurgeScope::Old {
            before,
            include_local,
        } => MediaSelection::Before {
            before,
            include_local,
            local_origin: local_origin.to_string(),
        },
        PurgeScope::User { user_id, before } => {
            match caller {
                AuthContext::GlobalAdmin { .. } => {}
                AuthContext::LocalAdmin { origin: own, .. } => {
                    if user_server(&user_id) != Some(own.as_str()) {
                        return Err(forbidden(format!("{user_id} is not a user of {own}")));
                    }
                }
                AuthContext::Owner { user_id: caller_id } => {
                    if *caller_id != user_id {
                        return Err(forbidden("owners may only purge their own media"));
                    }
                }
            }
            MediaSelection::UserBefore { user_id, before }
        }
        PurgeScope::Explicit { refs, before } => {
            let refs = match caller {
                AuthContext::LocalAdmin { origin: own, .. } => {
                    refs.into_iter().filter(|r| r.origin == *own).collect()
                }
                _ => refs,
            };
            return Ok(AuthorizedPurge {
                selection: MediaSelection::Refs(refs),
                before,
            });
        }
    };

    Ok(AuthorizedPurge {
        selection,
        before: None,
    })
}

/// Removes media records, their thumbnails and unreferenced blobs.
#[derive(Clone)]
pub struct PurgeService {
    media: Arc<dyn MediaStore>,
    store: DerivativeStore,
    rooms: Arc<dyn RoomDirectory>,
    local_origin: String,
}

impl PurgeService {
    /// Create a purge service for the server named `local_origin`.
    pub fn new(
        media: Arc<dyn MediaStore>,
        store: DerivativeStore,
        rooms: Arc<dyn RoomDirectory>,
        local_origin: impl Into<String>,
    ) -> Self {
        Self {
            media,
            store,
            rooms,
            local_origin: local_origin.into(),
        }
    }

    /// Purge `scope` on behalf of `caller`. Returns the removed records;
    /// records already gone are skipped, so repeating a purge returns an
    /// empty list.
    pub async fn purge(
        &self,
        scope: PurgeScope,
        caller: &AuthContext,
    ) -> AppResult<Vec<media::Model>> {
        let owner_only = matches!(scope, PurgeScope::Single { .. })
            && caller.tier() == Tier::Owner;
        let authorized = authorize(scope, caller, &self.local_origin)?;

        let mut records = self.media.select(&authorized.selection).await?;
        if let Some(before) = authorized.before {
            records.retain(|r| DateTime::<Utc>::from(r.created_at) < before);
        }

        if owner_only
            && let Some(record) = records.first()
            && Some(record.user_id.as_str()) != caller.user_id()
        {
            return Err(forbidden("owners may only purge their own media"));
        }

        self.remove_all(records).await
    }

    /// Purge the media referenced from `room_id`.
    pub async fn purge_room(
        &self,
        room_id: &str,
        before: Option<DateTime<Utc>>,
        caller: &AuthContext,
    ) -> AppResult<Vec<media::Model>> {
        caller.require(Tier::LocalAdmin)?;
        let refs = self.rooms.media_in_room(room_id).await?;
        self.purge(PurgeScope::Explicit { refs, before }, caller)
            .await
    }

    async fn remove_all(&self, records: Vec<media::Model>) -> AppResult<Vec<media::Model>> {
        let mut removed = Vec::with_capacity(records.len());
        for record in records {
            let Some(purged) = self.media.purge(&record.origin, &record.media_id).await? else {
                continue;
            };

            let deleted = self.store.delete_orphans(&purged.orphaned_locations).await;
            if deleted < purged.orphaned_locations.len() {
                warn!(
                    origin = %purged.media.origin,
                    media_id = %purged.media.media_id,
                    "Some blobs outlived their records"
                );
            }
            removed.push(purged.media);
        }

        info!(count = removed.len(), "Purged media");
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryMetadata;
    use crate::services::room::StaticRoomDirectory;
    use crate::services::storage::MemoryStorage;
    use crate::services::stores::ThumbnailStore;
    use chrono::Duration;
    use mediarepo_db::entities::thumbnail;
    use mediarepo_db::repositories::PurgedMedia;

    const LOCAL: &str = "local.test";

    struct Fixture {
        purge: PurgeService,
        meta: Arc<MemoryMetadata>,
        blobs: MemoryStorage,
        store: DerivativeStore,
    }

    fn fixture() -> Fixture {
        fixture_with_rooms(StaticRoomDirectory::default())
    }

    fn fixture_with_rooms(rooms: StaticRoomDirectory) -> Fixture {
        let meta = Arc::new(MemoryMetadata::new());
        let blobs = MemoryStorage::new();
        let store = DerivativeStore::new(Arc::new(blobs.clone()), meta.clone());
        Fixture {
            purge: PurgeService::new(meta.clone(), store.clone(), Arc::new(rooms), LOCAL),
            meta,
            blobs,
            store,
        }
    }

    impl Fixture {
        async fn add(
            &self,
            origin: &str,
            id: &str,
            user: &str,
            bytes: &[u8],
            age_days: i64,
        ) -> media::Model {
            let stored = self.store.persist(bytes).await.unwrap();
            let record = media::Model {
                origin: origin.to_string(),
                media_id: id.to_string(),
                upload_name: None,
                content_type: "image/png".to_string(),
                size_bytes: stored.size_bytes,
                sha256: stored.sha256,
                location: stored.location,
                user_id: user.to_string(),
                quarantined: false,
                created_at: (Utc::now() - Duration::days(age_days)).into(),
            };
            MediaStore::insert(self.meta.as_ref(), record).await.unwrap()
        }
    }

    fn owner(user: &str) -> AuthContext {
        AuthContext::Owner {
            user_id: user.to_string(),
        }
    }

    fn local_admin() -> AuthContext {
        AuthContext::LocalAdmin {
            user_id: "@mod:local.test".to_string(),
            origin: LOCAL.to_string(),
        }
    }

    fn global() -> AuthContext {
        AuthContext::GlobalAdmin { user_id: None }
    }

    fn ids(records: &[media::Model]) -> Vec<String> {
        records.iter().map(|r| r.media_id.clone()).collect()
    }

    #[tokio::test]
    async fn test_single_purge_is_idempotent() {
        let fx = fixture();
        fx.add(LOCAL, "a", "@alice:local.test", b"a", 0).await;
        let scope = PurgeScope::Single {
            origin: LOCAL.to_string(),
            media_id: "a".to_string(),
        };

        let first = fx.purge.purge(scope.clone(), &global()).await.unwrap();
        let second = fx.purge.purge(scope, &global()).await.unwrap();

        assert_eq!(ids(&first), vec!["a"]);
        assert!(second.is_empty());
        assert!(fx.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_shared_blob_survives_until_last_record() {
        let fx = fixture();
        let a = fx.add(LOCAL, "a", "@alice:local.test", b"same", 0).await;
        fx.add(LOCAL, "b", "@bob:local.test", b"same", 0).await;

        fx.purge
            .purge(
                PurgeScope::Single {
                    origin: LOCAL.to_string(),
                    media_id: "a".to_string(),
                },
                &global(),
            )
            .await
            .unwrap();
        assert!(fx.blobs.contains(&a.location));
        assert_eq!(fx.meta.ref_count(&a.location), 1);

        fx.purge
            .purge(
                PurgeScope::Single {
                    origin: LOCAL.to_string(),
                    media_id: "b".to_string(),
                },
                &global(),
            )
            .await
            .unwrap();
        assert!(!fx.blobs.contains(&a.location));
    }

    /// Stores a new record with the same bytes right after each purge
    /// commits, before orphaned blobs are deleted.
    struct ReuploadAfterPurge {
        inner: Arc<MemoryMetadata>,
        store: DerivativeStore,
        bytes: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl MediaStore for ReuploadAfterPurge {
        async fn find(&self, origin: &str, media_id: &str) -> AppResult<Option<media::Model>> {
            MediaStore::find(self.inner.as_ref(), origin, media_id).await
        }

        async fn insert(&self, record: media::Model) -> AppResult<media::Model> {
            MediaStore::insert(self.inner.as_ref(), record).await
        }

        async fn set_quarantined(
            &self,
            origin: &str,
            media_id: &str,
            quarantined: bool,
        ) -> AppResult<media::Model> {
            MediaStore::set_quarantined(self.inner.as_ref(), origin, media_id, quarantined).await
        }

        async fn select(&self, selection: &MediaSelection) -> AppResult<Vec<media::Model>> {
            MediaStore::select(self.inner.as_ref(), selection).await
        }

        async fn purge(
            &self,
            origin: &str,
            media_id: &str,
        ) -> AppResult<Option<PurgedMedia>> {
            let purged = MediaStore::purge(self.inner.as_ref(), origin, media_id).await?;
            let stored = self.store.persist(&self.bytes).await?;
            MediaStore::insert(
                self.inner.as_ref(),
                media::Model {
                    origin: LOCAL.to_string(),
                    media_id: "survivor".to_string(),
                    upload_name: None,
                    content_type: "image/png".to_string(),
                    size_bytes: stored.size_bytes,
                    sha256: stored.sha256,
                    location: stored.location,
                    user_id: "@bob:local.test".to_string(),
                    quarantined: false,
                    created_at: Utc::now().into(),
                },
            )
            .await?;
            Ok(purged)
        }
    }

    #[tokio::test]
    async fn test_upload_racing_purge_keeps_its_blob() {
        let fx = fixture();
        let a = fx.add(LOCAL, "a", "@alice:local.test", b"same", 0).await;
        let purge = PurgeService::new(
            Arc::new(ReuploadAfterPurge {
                inner: fx.meta.clone(),
                store: fx.store.clone(),
                bytes: b"same".to_vec(),
            }),
            fx.store.clone(),
            Arc::new(StaticRoomDirectory::default()),
            LOCAL,
        );

        let removed = purge
            .purge(
                PurgeScope::Single {
                    origin: LOCAL.to_string(),
                    media_id: "a".to_string(),
                },
                &global(),
            )
            .await
            .unwrap();

        assert_eq!(ids(&removed), vec!["a"]);
        let survivor = MediaStore::find(fx.meta.as_ref(), LOCAL, "survivor")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(survivor.location, a.location);
        assert_eq!(fx.meta.ref_count(&survivor.location), 1);
        assert!(fx.blobs.contains(&survivor.location));
        assert_eq!(fx.store.read(&survivor.location).await.unwrap(), b"same");
    }

    #[tokio::test]
    async fn test_thumbnails_go_with_their_media() {
        let fx = fixture();
        let record = fx.add(LOCAL, "a", "@alice:local.test", b"src", 0).await;
        let thumb = fx.store.persist(b"thumb").await.unwrap();
        ThumbnailStore::insert_if_absent(
            fx.meta.as_ref(),
            thumbnail::Model {
                origin: record.origin.clone(),
                media_id: record.media_id.clone(),
                width: 32,
                height: 32,
                method: "crop".to_string(),
                animated: false,
                forced: false,
                content_type: "image/png".to_string(),
                size_bytes: thumb.size_bytes,
                rendered_width: 32,
                rendered_height: 32,
                sha256: thumb.sha256,
                location: thumb.location.clone(),
                created_at: Utc::now().into(),
            },
        )
        .await
        .unwrap();

        fx.purge
            .purge(
                PurgeScope::Single {
                    origin: LOCAL.to_string(),
                    media_id: "a".to_string(),
                },
                &global(),
            )
            .await
            .unwrap();

        assert_eq!(fx.meta.thumbnail_count(), 0);
        assert!(!fx.blobs.contains(&thumb.location));
        assert!(fx.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_owner_cannot_purge_someone_elses_media() {
        let fx = fixture();
        fx.add(LOCAL, "a", "@alice:local.test", b"a", 0).await;

        let err = fx
            .purge
            .purge(
                PurgeScope::Single {
                    origin: LOCAL.to_string(),
                    media_id: "a".to_string(),
                },
                &owner("@mallory:local.test"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(fx.meta.media_count(), 1);
    }

    #[tokio::test]
    async fn test_owner_can_purge_own_media() {
        let fx = fixture();
        fx.add(LOCAL, "a", "@alice:local.test", b"a", 0).await;

        let removed = fx
            .purge
            .purge(
                PurgeScope::Single {
                    origin: LOCAL.to_string(),
                    media_id: "a".to_string(),
                },
                &owner("@alice:local.test"),
            )
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["a"]);
    }

    #[tokio::test]
    async fn test_lesser_tier_fails_before_touching_records() {
        let fx = fixture();
        fx.add("remote.test", "r", "@eve:remote.test", b"r", 10).await;

        let err = fx
            .purge
            .purge(
                PurgeScope::Remote {
                    before: Utc::now(),
                },
                &local_admin(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(fx.meta.media_count(), 1);
    }

    #[tokio::test]
    async fn test_local_admin_confined_to_own_origin() {
        let fx = fixture();
        fx.add("remote.test", "r", "@eve:remote.test", b"r", 10).await;

        let err = fx
            .purge
            .purge(
                PurgeScope::Origin {
                    origin: "remote.test".to_string(),
                    before: Utc::now(),
                },
                &local_admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = fx
            .purge
            .purge(
                PurgeScope::Quarantined {
                    origin: Some("remote.test".to_string()),
                },
                &local_admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_quarantined_scope_defaults_to_own_origin() {
        let fx = fixture();
        fx.add(LOCAL, "q1", "@alice:local.test", b"1", 0).await;
        fx.add("remote.test", "q2", "@eve:remote.test", b"2", 0).await;
        for (origin, id) in [(LOCAL, "q1"), ("remote.test", "q2")] {
            MediaStore::set_quarantined(fx.meta.as_ref(), origin, id, true)
                .await
                .unwrap();
        }

        let removed = fx
            .purge
            .purge(PurgeScope::Quarantined { origin: None }, &local_admin())
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["q1"]);

        let removed = fx
            .purge
            .purge(PurgeScope::Quarantined { origin: None }, &global())
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["q2"]);
    }

    #[tokio::test]
    async fn test_explicit_set_drops_foreign_refs_for_local_admin() {
        let fx = fixture();
        fx.add(LOCAL, "a", "@alice:local.test", b"a", 0).await;
        fx.add("remote.test", "r", "@eve:remote.test", b"r", 0).await;

        let removed = fx
            .purge
            .purge(
                PurgeScope::Explicit {
                    refs: vec![MediaRef::new(LOCAL, "a"), MediaRef::new("remote.test", "r")],
                    before: None,
                },
                &local_admin(),
            )
            .await
            .unwrap();

        assert_eq!(ids(&removed), vec!["a"]);
        assert_eq!(fx.meta.media_count(), 1);
    }

    #[tokio::test]
    async fn test_user_scope_rules() {
        let fx = fixture();
        fx.add(LOCAL, "old", "@alice:local.test", b"1", 5).await;
        fx.add(LOCAL, "new", "@alice:local.test", b"2", 0).await;
        let before = Utc::now() - Duration::days(1);

        let err = fx
            .purge
            .purge(
                PurgeScope::User {
                    user_id: "@alice:local.test".to_string(),
                    before,
                },
                &owner("@bob:local.test"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = fx
            .purge
            .purge(
                PurgeScope::User {
                    user_id: "@eve:remote.test".to_string(),
                    before,
                },
                &local_admin(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let removed = fx
            .purge
            .purge(
                PurgeScope::User {
                    user_id: "@alice:local.test".to_string(),
                    before,
                },
                &owner("@alice:local.test"),
            )
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["old"]);
    }

    #[tokio::test]
    async fn test_old_scope_respects_include_local() {
        let fx = fixture();
        fx.add(LOCAL, "l", "@alice:local.test", b"1", 5).await;
        fx.add("remote.test", "r", "@eve:remote.test", b"2", 5).await;
        let before = Utc::now() - Duration::days(1);

        let removed = fx
            .purge
            .purge(
                PurgeScope::Old {
                    before,
                    include_local: false,
                },
                &global(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["r"]);

        let removed = fx
            .purge
            .purge(
                PurgeScope::Old {
                    before,
                    include_local: true,
                },
                &global(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["l"]);
    }

    #[tokio::test]
    async fn test_room_purge_resolves_room_media() {
        let rooms = StaticRoomDirectory::default()
            .with_room("!room:local.test", vec![MediaRef::new(LOCAL, "a")]);
        let fx = fixture_with_rooms(rooms);
        fx.add(LOCAL, "a", "@alice:local.test", b"a", 0).await;
        fx.add(LOCAL, "b", "@alice:local.test", b"b", 0).await;

        let removed = fx
            .purge
            .purge_room("!room:local.test", None, &local_admin())
            .await
            .unwrap();
        assert_eq!(ids(&removed), vec!["a"]);

        assert!(matches!(
            fx.purge
                .purge_room("!room:local.test", None, &owner("@alice:local.test"))
                .await,
            Err(AppError::Forbidden(_))
        ));
    }
}
