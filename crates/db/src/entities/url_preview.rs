//! URL preview entity.
//!
//! One row per (URL, time bucket). A row carries either preview fields or an
//! error code, never both.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "url_preview")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub url: String,

    /// Start of the time bucket, in milliseconds since the epoch
    #[sea_orm(primary_key, auto_increment = false)]
    pub bucket_ts: i64,

    /// Cached failure classification
    #[sea_orm(nullable)]
    pub error_code: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(nullable)]
    pub site_name: Option<String>,

    /// URL the page declared for itself
    #[sea_orm(column_type = "Text", nullable)]
    pub canonical_url: Option<String>,

    /// `origin/media_id` of the stored preview image
    #[sea_orm(nullable)]
    pub image_ref: Option<String>,

    #[sea_orm(nullable)]
    pub image_content_type: Option<String>,

    #[sea_orm(nullable)]
    pub image_size_bytes: Option<i64>,

    #[sea_orm(nullable)]
    pub image_width: Option<i32>,

    #[sea_orm(nullable)]
    pub image_height: Option<i32>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
