use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServerInstances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServerInstances::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServerInstances::Title).string().not_null())
                    .col(
                        ColumnDef::new(ServerInstances::ControllerIdentifier)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServerInstances::Status)
                            .string()
                            .not_null()
                            .default("stopped"),
                    )
                    .col(ColumnDef::new(ServerInstances::SelectedModPackId).uuid().null())
                    .col(ColumnDef::new(ServerInstances::ActiveModPackId).uuid().null())
                    .col(
                        ColumnDef::new(ServerInstances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ServerInstances::UpgradedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ServerInstances::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ServerInstances::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ServerInstances {
    Table,
    Id,
    Title,
    ControllerIdentifier,
    Status,
    SelectedModPackId,
    ActiveModPackId,
    CreatedAt,
    UpgradedAt,
    IsActive,
}
