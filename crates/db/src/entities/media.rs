//! Media entity (one uploaded or federated file).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "media")]
pub struct Model {
    /// Server the media belongs to
    #[sea_orm(primary_key, auto_increment = false)]
    pub origin: String,

    /// Media ID, unique within the origin
    #[sea_orm(primary_key, auto_increment = false)]
    pub media_id: String,

    /// File name supplied at upload
    #[sea_orm(nullable)]
    pub upload_name: Option<String>,

    /// MIME type
    pub content_type: String,

    /// File size in bytes
    pub size_bytes: i64,

    /// SHA-256 of the content, hex encoded
    pub sha256: String,

    /// Storage location of the content
    pub location: String,

    /// Uploading user
    pub user_id: String,

    #[sea_orm(default_value = false)]
    pub quarantined: bool,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::thumbnail::Entity")]
    Thumbnail,
}

impl Related<super::thumbnail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Thumbnail.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
