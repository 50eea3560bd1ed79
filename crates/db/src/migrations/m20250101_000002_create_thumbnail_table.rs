//! Create `thumbnail` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Thumbnail::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Thumbnail::Origin).string_len(255).not_null())
                    .col(ColumnDef::new(Thumbnail::MediaId).string_len(128).not_null())
                    .col(ColumnDef::new(Thumbnail::Width).integer().not_null())
                    .col(ColumnDef::new(Thumbnail::Height).integer().not_null())
                    .col(ColumnDef::new(Thumbnail::Method).string_len(16).not_null())
                    .col(ColumnDef::new(Thumbnail::Animated).boolean().not_null())
                    .col(ColumnDef::new(Thumbnail::Forced).boolean().not_null())
                    .col(
                        ColumnDef::new(Thumbnail::ContentType)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Thumbnail::SizeBytes).big_integer().not_null())
                    .col(ColumnDef::new(Thumbnail::RenderedWidth).integer().not_null())
                    .col(ColumnDef::new(Thumbnail::RenderedHeight).integer().not_null())
                    .col(ColumnDef::new(Thumbnail::Sha256).string_len(64).not_null())
                    .col(ColumnDef::new(Thumbnail::Location).string_len(512).not_null())
                    .col(
                        ColumnDef::new(Thumbnail::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(Thumbnail::Origin)
                            .col(Thumbnail::MediaId)
                            .col(Thumbnail::Width)
                            .col(Thumbnail::Height)
                            .col(Thumbnail::Method)
                            .col(Thumbnail::Animated)
                            .col(Thumbnail::Forced),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_thumbnail_media")
                            .from(Thumbnail::Table, (Thumbnail::Origin, Thumbnail::MediaId))
                            .to(Media::Table, (Media::Origin, Media::MediaId))
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: location (reference lookups)
        manager
            .create_index(
                Index::create()
                    .name("idx_thumbnail_location")
                    .table(Thumbnail::Table)
                    .col(Thumbnail::Location)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Thumbnail::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Thumbnail {
    Table,
    Origin,
    MediaId,
    Width,
    Height,
    Method,
    Animated,
    Forced,
    ContentType,
    SizeBytes,
    RenderedWidth,
    RenderedHeight,
    Sha256,
    Location,
    CreatedAt,
}

#[derive(Iden)]
enum Media {
    Table,
    Origin,
    MediaId,
}
