use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModPacks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModPacks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ModPacks::Title).string().not_null())
                    .col(ColumnDef::new(ModPacks::Html).text().not_null())
                    .col(
                        ColumnDef::new(ModPacks::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ModPacks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ModPacks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ModPacks {
    Table,
    Id,
    Title,
    Html,
    IsActive,
    CreatedAt,
}
