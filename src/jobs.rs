pub mod job_context;
pub mod job_host;
pub mod job_registry;
pub mod job_result;
pub mod scheduled_job;
mod worker;

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    broker::BrokerError,
    coordination::workflow::WorkflowValidationError,
    scheduling::{JobKey, SchedulerError},
};

pub use job_context::JobContext;
pub use worker::WORKER_SUBCOMMAND;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),
    #[error("no job registered for job type: {0}")]
    UnknownJobType(String),
    #[error("failed to parse job arguments: {0}")]
    InvalidArguments(String),
    #[error("job was stopped by request")]
    StopRequested,
    #[error("job was cancelled")]
    Cancelled,
    #[error("step '{step}' did not report back within {timeout:?}")]
    StepTimeout { step: JobKey, timeout: Duration },
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("worker process failed: {0}")]
    Process(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Workflow(#[from] WorkflowValidationError),
}

/// A unit of work the host can execute. Arguments are deserialized from the
/// user-visible part of the merged data map, so every field arrives as a
/// string.
pub trait Job: Send + Sync {
    type Arguments: DeserializeOwned + Send + Sync;

    fn execute(
        context: &JobContext,
        arguments: Self::Arguments,
    ) -> impl Future<Output = Result<(), JobError>> + Send;

    fn name() -> &'static str;
}
