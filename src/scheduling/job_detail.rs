use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    coordination::{sequence::SequenceDefinition, workflow::WorkflowDefinition},
    execution::DataMap,
};

use super::keys::{generate_id, JobKey};

/// Where a worker job runs relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Runs as a task inside the host process, talking to it through the
    /// in-process broker transport.
    #[default]
    InProcess,
    /// Runs in a child process spawned by the host, talking to it over
    /// stdin/stdout.
    OutOfProcess,
}

/// What a firing of the job actually executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    Worker {
        job_type: String,
        #[serde(default)]
        mode: WorkerMode,
    },
    Sequence(SequenceDefinition),
    Workflow(WorkflowDefinition),
}

impl JobKind {
    /// Short type name used in logs and the instance log `job_type` column.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Worker { job_type, .. } => job_type,
            Self::Sequence(_) => "sequence",
            Self::Workflow(_) => "workflow",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobDetail {
    pub key: JobKey,
    pub id: String,
    pub description: Option<String>,
    pub kind: JobKind,
    pub data: DataMap,
    /// Durable jobs stay registered after their last trigger is gone.
    pub durable: bool,
    /// When false, at most one firing of this job runs at a time and
    /// overlapping firings are vetoed.
    pub concurrent: bool,
    pub timeout: Option<Duration>,
    /// Back-off applied when a firing fails. Copied into the data of every
    /// trigger scheduled for this job, which arms the retry listener.
    pub retry_span: Option<Duration>,
}

impl JobDetail {
    pub fn new(key: JobKey, kind: JobKind) -> Self {
        Self {
            key,
            id: generate_id(),
            description: None,
            kind,
            data: DataMap::new(),
            durable: true,
            concurrent: false,
            timeout: None,
            retry_span: None,
        }
    }

    pub fn worker(key: JobKey, job_type: impl Into<String>) -> Self {
        Self::new(
            key,
            JobKind::Worker {
                job_type: job_type.into(),
                mode: WorkerMode::InProcess,
            },
        )
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_span(mut self, span: Duration) -> Self {
        self.retry_span = Some(span);
        self
    }

    #[must_use]
    pub fn allow_concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: WorkerMode) -> Self {
        if let JobKind::Worker { mode: current, .. } = &mut self.kind {
            *current = mode;
        }
        self
    }
}
