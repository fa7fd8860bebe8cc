//! `SeaORM` Entity for job instance logs

use sea_orm::entity::prelude::*;

use crate::database::models::instance_status::InstanceStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "job_instance_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub fire_instance_id: String,
    pub instance_id: String,
    pub server_name: String,
    pub job_id: String,
    pub job_name: String,
    pub job_group: String,
    pub job_type: String,
    pub trigger_id: String,
    pub trigger_name: String,
    pub trigger_group: String,
    pub fire_time: DateTime,
    pub scheduled_fire_time: Option<DateTime>,
    pub start_date: DateTime,
    pub end_date: Option<DateTime>,
    pub duration_ms: Option<i64>,
    pub status: InstanceStatus,
    pub effected_rows: Option<i32>,
    pub progress: i16,
    #[sea_orm(column_type = "Text", nullable)]
    pub information: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub exception_text: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub data: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
