use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "server_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub server_instance_id: Uuid,
    pub time_stamp: DateTimeWithTimeZone,
    pub log_level: String,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub source: String,
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
