use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ServerLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServerLogs::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServerLogs::ServerInstanceId).uuid().not_null())
                    .col(
                        ColumnDef::new(ServerLogs::TimeStamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ServerLogs::LogLevel).string().not_null())
                    .col(ColumnDef::new(ServerLogs::Message).text().not_null())
                    .col(ColumnDef::new(ServerLogs::Source).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_server_logs_server_instance")
                            .from(ServerLogs::Table, ServerLogs::ServerInstanceId)
                            .to(ServerInstances::Table, ServerInstances::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_server_logs_server_instance_time")
                    .table(ServerLogs::Table)
                    .col(ServerLogs::ServerInstanceId)
                    .col(ServerLogs::TimeStamp)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ServerLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ServerInstances {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ServerLogs {
    Table,
    Id,
    ServerInstanceId,
    TimeStamp,
    LogLevel,
    Message,
    Source,
}
