//! Create `storage_object` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StorageObject::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StorageObject::Location)
                            .string_len(512)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StorageObject::Sha256).string_len(64).not_null())
                    .col(
                        ColumnDef::new(StorageObject::SizeBytes)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StorageObject::RefCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(StorageObject::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .check(Expr::col(StorageObject::RefCount).gte(0))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StorageObject::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum StorageObject {
    Table,
    Location,
    Sha256,
    SizeBytes,
    RefCount,
    CreatedAt,
}
