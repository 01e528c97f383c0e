pub use sea_orm_migration::prelude::*;

mod m0001_create_server_instances;
mod m0002_create_mod_packs;
mod m0003_create_configuration_entries;
mod m0004_create_lifetime_events;
mod m0005_create_server_logs;
mod m0006_unique_active_configuration_entry;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m0001_create_server_instances::Migration),
            Box::new(m0002_create_mod_packs::Migration),
            Box::new(m0003_create_configuration_entries::Migration),
            Box::new(m0004_create_lifetime_events::Migration),
            Box::new(m0005_create_server_logs::Migration),
            Box::new(m0006_unique_active_configuration_entry::Migration),
        ]
    }
}
