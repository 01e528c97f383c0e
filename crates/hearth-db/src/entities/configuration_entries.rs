use sea_orm::entity::prelude::*;

/// Versioned configuration value. Rows are never mutated except for the
/// `is_active` flag flipping to false when a newer value supersedes them.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "configuration_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub server_instance_id: Uuid,
    pub realm: String,
    pub path: String,
    #[sea_orm(column_type = "Text")]
    pub value: String,
    pub changed_by: Option<Uuid>,
    pub time_stamp: DateTimeWithTimeZone,
    pub is_sensitive: bool,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::server_instances::Entity",
        from = "Column::ServerInstanceId",
        to = "super::server_instances::Column::Id"
    )]
    ServerInstance,
}

impl Related<super::server_instances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServerInstance.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
