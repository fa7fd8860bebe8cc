use std::fmt::{Display, Formatter, Result};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::instance_status::InstanceStatus;
use crate::execution::{DataMap, ExceptionDetail};

/// Terminal state of one firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FiringStatus {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl Display for FiringStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed out"),
        }
    }
}

impl From<FiringStatus> for InstanceStatus {
    fn from(status: FiringStatus) -> Self {
        match status {
            FiringStatus::Succeeded => Self::Success,
            FiringStatus::Failed | FiringStatus::Cancelled | FiringStatus::TimedOut => Self::Fail,
        }
    }
}

/// Everything the host knows about a firing once it is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct FiringReport {
    pub fire_instance_id: String,
    pub status: FiringStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub effected_rows: Option<i32>,
    pub information: String,
    pub exceptions: Vec<ExceptionDetail>,
    /// Job data written by the worker, applied to the job definition after
    /// the firing.
    pub job_data_updates: DataMap,
    /// Trigger data written by the worker, applied to the firing trigger.
    pub trigger_data_updates: DataMap,
}

impl FiringReport {
    /// The "Fail" flag read by the retry listener.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.status != FiringStatus::Succeeded
    }

    #[must_use]
    pub fn exceptions_text(&self) -> String {
        crate::execution::ExecutionMetadata {
            exceptions: self.exceptions.clone(),
            ..Default::default()
        }
        .exceptions_text()
    }
}
