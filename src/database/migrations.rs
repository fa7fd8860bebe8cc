pub use sea_orm_migration::prelude::*;

mod m20261001_090000_create_job_instance_log;
mod m20261001_091500_create_monitor_tables;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_090000_create_job_instance_log::Migration),
            Box::new(m20261001_091500_create_monitor_tables::Migration),
        ]
    }
}

pub struct Migrator;
