use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::warn;

use crate::{
    database::models::{
        instance_status::InstanceStatus,
        job_instance_log::{self, Entity as JobInstanceLogEntity},
        monitor_action::{self, Entity as MonitorActionEntity},
        monitor_group_user::{self, Entity as MonitorGroupUserEntity},
    },
    monitor::{MonitorAction, MonitorEvent, MonitorRecipient},
};

use super::{fails_in_row, InstanceProgress, JobInstanceLog, JobStore, StoreError};

/// `sea-orm` backed store (Postgres or SQLite).
#[derive(Clone, Debug)]
pub struct DatabaseStore {
    db: DatabaseConnection,
}

impl DatabaseStore {
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn find_log(
        &self,
        fire_instance_id: &str,
    ) -> Result<job_instance_log::Model, StoreError> {
        JobInstanceLogEntity::find()
            .filter(job_instance_log::Column::FireInstanceId.eq(fire_instance_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::LogNotFound(fire_instance_id.to_string()))
    }
}

fn progress_column(progress: u8) -> i16 {
    i16::from(progress)
}

fn apply_log(active: &mut job_instance_log::ActiveModel, log: &JobInstanceLog) {
    active.fire_instance_id = Set(log.fire_instance_id.clone());
    active.instance_id = Set(log.instance_id.clone());
    active.server_name = Set(log.server_name.clone());
    active.job_id = Set(log.job_id.clone());
    active.job_name = Set(log.job_name.clone());
    active.job_group = Set(log.job_group.clone());
    active.job_type = Set(log.job_type.clone());
    active.trigger_id = Set(log.trigger_id.clone());
    active.trigger_name = Set(log.trigger_name.clone());
    active.trigger_group = Set(log.trigger_group.clone());
    active.fire_time = Set(log.fire_time.naive_utc());
    active.scheduled_fire_time = Set(log.scheduled_fire_time.map(|t| t.naive_utc()));
    active.start_date = Set(log.start_date.naive_utc());
    active.end_date = Set(log.end_date.map(|t| t.naive_utc()));
    active.duration_ms = Set(log.duration_ms);
    active.status = Set(log.status);
    active.effected_rows = Set(log.effected_rows);
    active.progress = Set(progress_column(log.progress));
    active.information = Set(log.information.clone());
    active.exception_text = Set(log.exception_text.clone());
    active.data = Set(log.data.clone());
}

impl TryFrom<monitor_action::Model> for MonitorAction {
    type Error = crate::monitor::UnknownMonitorEvent;

    fn try_from(model: monitor_action::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            title: model.title,
            event: MonitorEvent::try_from(model.event)?,
            hook: model.hook,
            job_id: model.job_id,
            job_group: model.job_group,
            group_id: model.group_id,
            event_argument: model.event_argument,
            active: model.active,
        })
    }
}

#[async_trait]
impl JobStore for DatabaseStore {
    async fn create_job_instance_log(&self, log: &JobInstanceLog) -> Result<(), StoreError> {
        let mut active = <job_instance_log::ActiveModel as Default>::default();
        apply_log(&mut active, log);
        active.insert(&self.db).await?;
        Ok(())
    }

    async fn update_history_job_run_log(&self, log: &JobInstanceLog) -> Result<(), StoreError> {
        let mut active: job_instance_log::ActiveModel =
            self.find_log(&log.fire_instance_id).await?.into();
        apply_log(&mut active, log);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn set_job_instance_log_status(
        &self,
        fire_instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let mut active: job_instance_log::ActiveModel =
            self.find_log(fire_instance_id).await?.into();
        active.status = Set(status);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn persist_job_instance_information(
        &self,
        progress: &InstanceProgress,
    ) -> Result<(), StoreError> {
        let mut active: job_instance_log::ActiveModel =
            self.find_log(&progress.fire_instance_id).await?.into();
        active.progress = Set(progress_column(progress.progress));
        active.effected_rows = Set(progress.effected_rows);
        active.information = Set(progress.information.clone());
        active.exception_text = Set(progress.exception_text.clone());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn count_fails_in_row_for_job(
        &self,
        job_id: &str,
        total: u32,
    ) -> Result<u32, StoreError> {
        let statuses: Vec<InstanceStatus> = JobInstanceLogEntity::find()
            .select_only()
            .column(job_instance_log::Column::Status)
            .filter(job_instance_log::Column::JobId.eq(job_id))
            .filter(job_instance_log::Column::Status.ne(InstanceStatus::Running))
            .order_by_desc(job_instance_log::Column::StartDate)
            .limit(u64::from(total))
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(fails_in_row(statuses))
    }

    async fn count_fails_in_hour_for_job(&self, job_id: &str) -> Result<u32, StoreError> {
        let since = (Utc::now() - Duration::hours(1)).naive_utc();

        let count = JobInstanceLogEntity::find()
            .filter(job_instance_log::Column::JobId.eq(job_id))
            .filter(job_instance_log::Column::Status.eq(InstanceStatus::Fail))
            .filter(job_instance_log::Column::StartDate.gte(since))
            .count(&self.db)
            .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn get_monitor_data(&self) -> Result<Vec<MonitorAction>, StoreError> {
        let models = MonitorActionEntity::find()
            .order_by_asc(monitor_action::Column::Id)
            .all(&self.db)
            .await?;

        Ok(models
            .into_iter()
            .filter_map(|model| {
                let id = model.id;
                MonitorAction::try_from(model)
                    .map_err(|e| warn!("⚠️ Skipping monitor {}: {}", id, e))
                    .ok()
            })
            .collect())
    }

    async fn get_group_users(&self, group_id: i32) -> Result<Vec<MonitorRecipient>, StoreError> {
        let users = MonitorGroupUserEntity::find()
            .filter(monitor_group_user::Column::GroupId.eq(group_id))
            .order_by_asc(monitor_group_user::Column::Id)
            .all(&self.db)
            .await?;

        Ok(users
            .into_iter()
            .map(|user| MonitorRecipient {
                name: user.name,
                email: user.email,
            })
            .collect())
    }
}
