//! Thumbnail entity (a derived raster of a media record).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "thumbnail")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub origin: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub media_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub width: i32,

    #[sea_orm(primary_key, auto_increment = false)]
    pub height: i32,

    /// `scale` or `crop`
    #[sea_orm(primary_key, auto_increment = false)]
    pub method: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub animated: bool,

    /// Generated under `force`, possibly smaller than the requested box
    #[sea_orm(primary_key, auto_increment = false)]
    pub forced: bool,

    /// MIME type of the encoded thumbnail
    pub content_type: String,

    pub size_bytes: i64,

    /// Pixel size of the encoded image
    pub rendered_width: i32,

    pub rendered_height: i32,

    pub sha256: String,

    pub location: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::media::Entity",
        from = "(Column::Origin, Column::MediaId)",
        to = "(super::media::Column::Origin, super::media::Column::MediaId)",
        on_delete = "Cascade"
    )]
    Media,
}

impl Related<super::media::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Media.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
