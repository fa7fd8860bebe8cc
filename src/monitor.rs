//! Monitor/event dispatch: turns firing lifecycle events into notifications.
//!
//! Monitors ([`MonitorAction`]) are persisted definitions binding an event
//! kind to a hook, scoped to a job id or a job group. The [`MonitorEngine`]
//! selects the monitors matching a firing, evaluates their predicates and
//! dispatches every match to its [`Hook`] concurrently. Nothing a hook does
//! can fail the firing that triggered it.

mod cache;
mod email_hook;
mod engine;
mod hooks;
mod veto_listener;

use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumIter;
use thiserror::Error;

use crate::{
    execution::{DataMap, ExecutionContext},
    persistence::StoreError,
    scheduling::JobKey,
};

pub use cache::MonitorCache;
pub use email_hook::{EmailHook, EMAIL_HOOK};
pub use engine::{select_monitors, MonitorEngine, MonitorEngineSettings};
pub use hooks::{HookRegistry, LogHook, LOG_HOOK};
pub use veto_listener::MonitorVetoListener;

/// Lifecycle events a monitor can subscribe to. The discriminants are the
/// stable ids stored in `monitor_action.event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
pub enum MonitorEvent {
    ExecutionVetoed = 1,
    ExecutionRetry = 2,
    ExecutionLastRetryFail = 3,
    ExecutionFail = 4,
    ExecutionSuccess = 5,
    ExecutionStart = 6,
    ExecutionEnd = 7,
    ExecutionFailxTimesInRow = 8,
    ExecutionFailxTimesInHour = 9,
}

impl MonitorEvent {
    #[must_use]
    pub const fn id(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::ExecutionVetoed => "Execution vetoed",
            Self::ExecutionRetry => "Execution retry",
            Self::ExecutionLastRetryFail => "Last retry failed",
            Self::ExecutionFail => "Execution failed",
            Self::ExecutionSuccess => "Execution succeeded",
            Self::ExecutionStart => "Execution started",
            Self::ExecutionEnd => "Execution ended",
            Self::ExecutionFailxTimesInRow => "Execution failed x times in a row",
            Self::ExecutionFailxTimesInHour => "Execution failed x times in an hour",
        }
    }

    /// Plain events fire unconditionally once a monitor is in scope.
    #[must_use]
    pub const fn is_plain(self) -> bool {
        !matches!(
            self,
            Self::ExecutionFailxTimesInRow | Self::ExecutionFailxTimesInHour
        )
    }
}

impl Display for MonitorEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown monitor event id: {0}")]
pub struct UnknownMonitorEvent(pub i32);

impl TryFrom<i32> for MonitorEvent {
    type Error = UnknownMonitorEvent;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        Ok(match id {
            1 => Self::ExecutionVetoed,
            2 => Self::ExecutionRetry,
            3 => Self::ExecutionLastRetryFail,
            4 => Self::ExecutionFail,
            5 => Self::ExecutionSuccess,
            6 => Self::ExecutionStart,
            7 => Self::ExecutionEnd,
            8 => Self::ExecutionFailxTimesInRow,
            9 => Self::ExecutionFailxTimesInHour,
            other => return Err(UnknownMonitorEvent(other)),
        })
    }
}

/// One monitor definition.
///
/// Scope: `job_id` targets a single job, `job_group` (without a job id) a
/// whole group. A monitor with neither is global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorAction {
    pub id: i32,
    pub title: String,
    pub event: MonitorEvent,
    pub hook: String,
    pub job_id: Option<String>,
    pub job_group: Option<String>,
    pub group_id: Option<i32>,
    /// Threshold for the counting events.
    pub event_argument: Option<String>,
    pub active: bool,
}

impl MonitorAction {
    #[must_use]
    pub fn new(
        id: i32,
        title: impl Into<String>,
        event: MonitorEvent,
        hook: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            event,
            hook: hook.into(),
            job_id: None,
            job_group: None,
            group_id: None,
            event_argument: None,
            active: true,
        }
    }

    #[must_use]
    pub fn for_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    #[must_use]
    pub fn for_group(mut self, job_group: impl Into<String>) -> Self {
        self.job_group = Some(job_group.into());
        self
    }

    #[must_use]
    pub const fn notify_group(mut self, group_id: i32) -> Self {
        self.group_id = Some(group_id);
        self
    }

    #[must_use]
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.event_argument = Some(argument.into());
        self
    }

    #[must_use]
    pub const fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.job_id.is_none() && self.job_group.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRecipient {
    pub name: String,
    pub email: String,
}

/// The firing facts an event is raised with.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorEventInfo {
    pub job_key: JobKey,
    pub job_id: String,
    pub fire_instance_id: String,
    pub fire_time: DateTime<Utc>,
    pub environment: String,
    pub exception_text: Option<String>,
    pub duration: Option<std::time::Duration>,
    pub data: DataMap,
}

impl MonitorEventInfo {
    #[must_use]
    pub fn from_context(context: &ExecutionContext) -> Self {
        Self {
            job_key: context.job_key().clone(),
            job_id: context.job_id().to_string(),
            fire_instance_id: context.fire_instance_id().to_string(),
            fire_time: context.fire_time(),
            environment: context.environment().to_string(),
            exception_text: None,
            duration: None,
            data: context.user_data(),
        }
    }

    #[must_use]
    pub fn with_exception_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.exception_text = (!text.is_empty()).then_some(text);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Everything a hook receives for one matched monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorDetails {
    pub event: MonitorEvent,
    pub event_title: String,
    pub monitor_id: i32,
    pub monitor_title: String,
    pub group_id: Option<i32>,
    pub recipients: Vec<MonitorRecipient>,
    pub info: MonitorEventInfo,
    pub global_config: DataMap,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Email(#[from] crate::mailer::EmailError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A notification target. Registered by name in the [`HookRegistry`].
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, details: &MonitorDetails) -> Result<(), HookError>;
}
