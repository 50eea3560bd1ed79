//! Create `media` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Media::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Media::Origin).string_len(255).not_null())
                    .col(ColumnDef::new(Media::MediaId).string_len(128).not_null())
                    .col(ColumnDef::new(Media::UploadName).string_len(512))
                    .col(ColumnDef::new(Media::ContentType).string_len(128).not_null())
                    .col(ColumnDef::new(Media::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Media::Sha256).string_len(64).not_null())
                    .col(ColumnDef::new(Media::Location).string_len(512).not_null())
                    .col(ColumnDef::new(Media::UserId).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Media::Quarantined)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Media::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(Index::create().col(Media::Origin).col(Media::MediaId))
                    .to_owned(),
            )
            .await?;

        // Index: user_id (user purges)
        manager
            .create_index(
                Index::create()
                    .name("idx_media_user_id")
                    .table(Media::Table)
                    .col(Media::UserId)
                    .to_owned(),
            )
            .await?;

        // Index: sha256 (duplicate detection)
        manager
            .create_index(
                Index::create()
                    .name("idx_media_sha256")
                    .table(Media::Table)
                    .col(Media::Sha256)
                    .to_owned(),
            )
            .await?;

        // Index: created_at (cutoff purges)
        manager
            .create_index(
                Index::create()
                    .name("idx_media_created_at")
                    .table(Media::Table)
                    .col(Media::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Media::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Media {
    Table,
    Origin,
    MediaId,
    UploadName,
    ContentType,
    SizeBytes,
    Sha256,
    Location,
    UserId,
    Quarantined,
    CreatedAt,
}
