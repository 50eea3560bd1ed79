//! Storage object entity: reference counts for content-addressed blobs.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "storage_object")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub location: String,

    pub sha256: String,

    pub size_bytes: i64,

    /// Number of media and thumbnail rows pointing at this object
    pub ref_count: i64,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
