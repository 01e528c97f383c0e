use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LifetimeEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LifetimeEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LifetimeEvents::ServerInstanceId).uuid().not_null())
                    .col(
                        ColumnDef::new(LifetimeEvents::TimeStamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(LifetimeEvents::Status).string().not_null())
                    .col(ColumnDef::new(LifetimeEvents::ExecutedBy).uuid().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_lifetime_events_server_instance")
                            .from(LifetimeEvents::Table, LifetimeEvents::ServerInstanceId)
                            .to(ServerInstances::Table, ServerInstances::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_lifetime_events_server_instance_id")
                    .table(LifetimeEvents::Table)
                    .col(LifetimeEvents::ServerInstanceId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LifetimeEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ServerInstances {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum LifetimeEvents {
    Table,
    Id,
    ServerInstanceId,
    TimeStamp,
    Status,
    ExecutedBy,
}
