//! The scheduler interface the orchestration core is written against, plus a
//! single-process implementation of it.
//!
//! The core only needs a handful of primitives from a scheduler: register a
//! job with a trigger, add a trigger for an existing job, fire a job right
//! now, look a job up and cancel a running firing. Lifecycle listeners
//! ([`JobListener`], [`TriggerListener`]) are the hooks the retry state
//! machine and the monitor engine attach to.

mod job_detail;
mod keys;
mod listeners;
pub mod local_scheduler;
mod trigger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::execution::DataMap;

pub use job_detail::{JobDetail, JobKind, WorkerMode};
pub use keys::{
    generate_id, JobKey, KeyParseError, TriggerKey, DEFAULT_GROUP, RETRY_TRIGGER_GROUP,
    SYSTEM_GROUP,
};
pub use listeners::{FiringRunner, JobListener, TriggerListener};
pub use local_scheduler::LocalScheduler;
pub use trigger::{MisfirePolicy, Trigger, TriggerSchedule};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job '{0}' does not exist")]
    JobNotFound(JobKey),
    #[error("job '{0}' already exists")]
    JobAlreadyExists(JobKey),
    #[error("trigger '{0}' already exists")]
    TriggerAlreadyExists(TriggerKey),
    #[error("trigger '{trigger}' has an invalid schedule: {reason}")]
    InvalidSchedule { trigger: TriggerKey, reason: String },
    #[error("scheduler is shut down")]
    Shutdown,
}

/// A firing currently in flight, as reported by [`Scheduler::running_firings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningFiring {
    pub fire_instance_id: String,
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub fire_time: DateTime<Utc>,
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Registers a new job together with its first trigger.
    async fn schedule_job(&self, job: JobDetail, trigger: Trigger) -> Result<(), SchedulerError>;

    /// Adds a trigger for a job that is already registered.
    async fn schedule_trigger(&self, trigger: Trigger) -> Result<(), SchedulerError>;

    /// Fires a registered job immediately through a one-shot trigger whose
    /// data is `data`. Returns the key of the created trigger.
    async fn trigger_job(&self, job_key: &JobKey, data: DataMap)
        -> Result<TriggerKey, SchedulerError>;

    async fn get_job_detail(&self, job_key: &JobKey) -> Option<JobDetail>;

    /// Requests cancellation of a running firing. Returns false when no such
    /// firing is running.
    async fn cancel_running(&self, fire_instance_id: &str) -> bool;

    fn running_firings(&self) -> Vec<RunningFiring>;
}
