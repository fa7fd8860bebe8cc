//! Narrow persistence interface used by the host and the monitor engine.

mod database_store;
mod memory_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    database::models::instance_status::InstanceStatus,
    execution::{
        truncate::{limits, truncate, truncate_opt},
        ExecutionContext,
    },
    monitor::{MonitorAction, MonitorRecipient},
};

pub use database_store::DatabaseStore;
pub use memory_store::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sea_orm::DbErr),
    #[error("job instance log '{0}' does not exist")]
    LogNotFound(String),
    #[error("{0}")]
    Unavailable(String),
}

/// One row of the job instance history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstanceLog {
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
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: InstanceStatus,
    pub effected_rows: Option<i32>,
    pub progress: u8,
    pub information: Option<String>,
    pub exception_text: Option<String>,
    pub data: Option<String>,
}

impl JobInstanceLog {
    /// A `Running` row for a firing that is about to start.
    #[must_use]
    pub fn start(
        context: &ExecutionContext,
        job_type: &str,
        instance_id: &str,
        server_name: &str,
    ) -> Self {
        let data = serde_json::to_string(&context.user_data()).ok();

        Self {
            fire_instance_id: context.fire_instance_id().to_string(),
            instance_id: instance_id.to_string(),
            server_name: server_name.to_string(),
            job_id: context.job_id().to_string(),
            job_name: context.job_key().name.clone(),
            job_group: context.job_key().group.clone(),
            job_type: job_type.to_string(),
            trigger_id: context.trigger_id().to_string(),
            trigger_name: context.trigger_key().name.clone(),
            trigger_group: context.trigger_key().group.clone(),
            fire_time: context.fire_time(),
            scheduled_fire_time: context.scheduled_fire_time(),
            start_date: Utc::now(),
            end_date: None,
            duration_ms: None,
            status: InstanceStatus::Running,
            effected_rows: None,
            progress: 0,
            information: None,
            exception_text: None,
            data,
        }
    }

    /// Applies the column width limits. Lossy, but deterministic.
    #[must_use]
    pub fn truncated(self) -> Self {
        Self {
            fire_instance_id: truncate(&self.fire_instance_id, limits::INSTANCE_ID),
            instance_id: truncate(&self.instance_id, limits::INSTANCE_ID),
            server_name: truncate(&self.server_name, limits::SERVER_NAME),
            job_id: truncate(&self.job_id, limits::JOB_ID),
            job_name: truncate(&self.job_name, limits::JOB_NAME),
            job_group: truncate(&self.job_group, limits::JOB_GROUP),
            job_type: truncate(&self.job_type, limits::JOB_TYPE),
            trigger_id: truncate(&self.trigger_id, limits::TRIGGER_ID),
            trigger_name: truncate(&self.trigger_name, limits::TRIGGER_NAME),
            trigger_group: truncate(&self.trigger_group, limits::TRIGGER_GROUP),
            data: truncate_opt(self.data.as_deref(), limits::DATA),
            ..self
        }
    }
}

/// Snapshot of a running firing, persisted periodically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceProgress {
    pub fire_instance_id: String,
    pub progress: u8,
    pub effected_rows: Option<i32>,
    pub information: Option<String>,
    pub exception_text: Option<String>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job_instance_log(&self, log: &JobInstanceLog) -> Result<(), StoreError>;

    /// Overwrites the row of `log.fire_instance_id` with the terminal values.
    async fn update_history_job_run_log(&self, log: &JobInstanceLog) -> Result<(), StoreError>;

    async fn set_job_instance_log_status(
        &self,
        fire_instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), StoreError>;

    async fn persist_job_instance_information(
        &self,
        progress: &InstanceProgress,
    ) -> Result<(), StoreError>;

    /// Number of consecutive failures among the `total` most recent finished
    /// runs of `job_id`, counted from the newest one.
    async fn count_fails_in_row_for_job(&self, job_id: &str, total: u32)
        -> Result<u32, StoreError>;

    /// Failed runs of `job_id` started within the last hour.
    async fn count_fails_in_hour_for_job(&self, job_id: &str) -> Result<u32, StoreError>;

    async fn get_monitor_data(&self) -> Result<Vec<MonitorAction>, StoreError>;

    async fn get_group_users(&self, group_id: i32) -> Result<Vec<MonitorRecipient>, StoreError>;
}

/// Shared counting rule: `statuses` newest first.
fn fails_in_row(statuses: impl IntoIterator<Item = InstanceStatus>) -> u32 {
    let count = statuses
        .into_iter()
        .take_while(|status| *status == InstanceStatus::Fail)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}
