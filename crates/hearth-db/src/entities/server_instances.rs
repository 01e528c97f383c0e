use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "server_instances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub controller_identifier: String,
    pub status: String,
    pub selected_mod_pack_id: Option<Uuid>,
    pub active_mod_pack_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
    pub upgraded_at: Option<DateTimeWithTimeZone>,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::configuration_entries::Entity")]
    ConfigurationEntries,
    #[sea_orm(has_many = "super::lifetime_events::Entity")]
    LifetimeEvents,
    #[sea_orm(has_many = "super::server_logs::Entity")]
    ServerLogs,
}

impl Related<super::configuration_entries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConfigurationEntries.def()
    }
}

impl Related<super::lifetime_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LifetimeEvents.def()
    }
}

impl Related<super::server_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServerLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
