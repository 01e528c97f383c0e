pub mod configuration_entries;
pub mod lifetime_events;
pub mod mod_packs;
pub mod server_instances;
pub mod server_logs;
