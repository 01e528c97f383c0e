use sea_orm::entity::prelude::*;

/// Append-only record of every status a server entered.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "lifetime_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub server_instance_id: Uuid,
    pub time_stamp: DateTimeWithTimeZone,
    pub status: String,
    // None: initiated by the agent itself.
    pub executed_by: Option<Uuid>,
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
