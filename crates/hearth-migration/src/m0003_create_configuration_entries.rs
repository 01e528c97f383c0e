use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConfigurationEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConfigurationEntries::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConfigurationEntries::ServerInstanceId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ConfigurationEntries::Realm).string().not_null())
                    .col(ColumnDef::new(ConfigurationEntries::Path).string().not_null())
                    .col(ColumnDef::new(ConfigurationEntries::Value).text().not_null())
                    .col(ColumnDef::new(ConfigurationEntries::ChangedBy).uuid().null())
                    .col(
                        ColumnDef::new(ConfigurationEntries::TimeStamp)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ConfigurationEntries::IsSensitive)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ConfigurationEntries::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_configuration_entries_server_instance")
                            .from(
                                ConfigurationEntries::Table,
                                ConfigurationEntries::ServerInstanceId,
                            )
                            .to(ServerInstances::Table, ServerInstances::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookups always go by (server, realm, path) restricted to active rows.
        manager
            .create_index(
                Index::create()
                    .name("idx_configuration_entries_lookup")
                    .table(ConfigurationEntries::Table)
                    .col(ConfigurationEntries::ServerInstanceId)
                    .col(ConfigurationEntries::Realm)
                    .col(ConfigurationEntries::Path)
                    .col(ConfigurationEntries::IsActive)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_configuration_entries_lookup")
                    .table(ConfigurationEntries::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ConfigurationEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ServerInstances {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ConfigurationEntries {
    Table,
    Id,
    ServerInstanceId,
    Realm,
    Path,
    Value,
    ChangedBy,
    TimeStamp,
    IsSensitive,
    IsActive,
}
