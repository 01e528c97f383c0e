use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// At most one active row per (server, realm, path). Partial index syntax is
// shared by postgres and sqlite.
const CREATE: &str = "CREATE UNIQUE INDEX IF NOT EXISTS uq_configuration_entries_active \
    ON configuration_entries (server_instance_id, realm, path) WHERE is_active = true";

// Keeps the newest active row of any key that already has several.
const DEDUPE: &str = "UPDATE configuration_entries SET is_active = false \
    WHERE is_active = true AND id NOT IN ( \
        SELECT MAX(id) FROM configuration_entries WHERE is_active = true \
        GROUP BY server_instance_id, realm, path)";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DEDUPE).await?;
        db.execute_unprepared(CREATE).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_configuration_entries_active")
                    .table(ConfigurationEntries::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum ConfigurationEntries {
    Table,
}
