//! `SeaORM` Entity for monitor definitions

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "monitor_action")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub title: String,
    /// Stable integer id of a `MonitorEvent`.
    pub event: i32,
    pub hook: String,
    pub job_id: Option<String>,
    pub job_group: Option<String>,
    pub group_id: Option<i32>,
    pub event_argument: Option<String>,
    pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
