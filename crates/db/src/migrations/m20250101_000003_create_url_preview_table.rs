//! Create `url_preview` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UrlPreview::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(UrlPreview::Url).text().not_null())
                    .col(ColumnDef::new(UrlPreview::BucketTs).big_integer().not_null())
                    .col(ColumnDef::new(UrlPreview::ErrorCode).string_len(32))
                    .col(ColumnDef::new(UrlPreview::Title).text())
                    .col(ColumnDef::new(UrlPreview::Description).text())
                    .col(ColumnDef::new(UrlPreview::SiteName).string_len(512))
                    .col(ColumnDef::new(UrlPreview::CanonicalUrl).text())
                    .col(ColumnDef::new(UrlPreview::ImageRef).string_len(512))
                    .col(ColumnDef::new(UrlPreview::ImageContentType).string_len(128))
                    .col(ColumnDef::new(UrlPreview::ImageSizeBytes).big_integer())
                    .col(ColumnDef::new(UrlPreview::ImageWidth).integer())
                    .col(ColumnDef::new(UrlPreview::ImageHeight).integer())
                    .col(
                        ColumnDef::new(UrlPreview::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(UrlPreview::Url)
                            .col(UrlPreview::BucketTs),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UrlPreview::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum UrlPreview {
    Table,
    Url,
    BucketTs,
    ErrorCode,
    Title,
    Description,
    SiteName,
    CanonicalUrl,
    ImageRef,
    ImageContentType,
    ImageSizeBytes,
    ImageWidth,
    ImageHeight,
    CreatedAt,
}
