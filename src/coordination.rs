//! Composite jobs: sequences and workflows of steps.
//!
//! A coordinator runs inside the firing of the composite job. For every step
//! it registers a wait handle in the [`SignalRegistry`], fires the step's job
//! through the scheduler and blocks until the step's host reports back (or
//! the wait times out, or the composite firing is cancelled). The child finds
//! its way back through system keys in its data map, see [`step_key_for`].

pub mod sequence;
mod signals;
mod step;
pub mod workflow;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    execution::{DataMap, ExecutionContext},
    jobs::JobContext,
    scheduling::{JobKey, JobListener, Scheduler},
};

pub use signals::{SignalRegistry, WaitHandle, WaitOutcome};
pub use step::{CoordinatorRun, StepEvent, StepKey, StepOutcome, StepReport, StepStatus};

pub const SEQUENCE_INSTANCE_KEY: &str = "__sequence_instance_id";
pub const SEQUENCE_STEP_INDEX_KEY: &str = "__sequence_step_index";
pub const SEQUENCE_JOB_KEY: &str = "__sequence_job_key";
pub const SEQUENCE_TRIGGER_ID_KEY: &str = "__sequence_trigger_id";
pub const WORKFLOW_INSTANCE_KEY: &str = "__workflow_instance_id";
pub const WORKFLOW_JOB_KEY: &str = "__workflow_job_key";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("no coordinator is waiting for step {0}")]
    NoWaiter(StepKey),
    #[error("invalid step index '{0}' in job data")]
    InvalidStepIndex(String),
}

/// What a coordinator needs besides the parent's [`JobContext`].
#[derive(Clone)]
pub struct CoordinatorServices {
    pub scheduler: Arc<dyn Scheduler>,
    pub signals: SignalRegistry,
    /// Wait applied to steps that do not set their own timeout.
    pub default_step_timeout: Duration,
}

/// Resolves the coordinator wait a firing of `job_key` must answer, if any.
pub fn step_key_for(
    job_key: &JobKey,
    data: &DataMap,
) -> Result<Option<StepKey>, CoordinationError> {
    if let Some(run_id) = data.get(SEQUENCE_INSTANCE_KEY) {
        let raw_index = data.get(SEQUENCE_STEP_INDEX_KEY).map_or("", String::as_str);
        let index = raw_index
            .parse()
            .map_err(|_| CoordinationError::InvalidStepIndex(raw_index.to_string()))?;
        return Ok(Some(StepKey::new(job_key.clone(), run_id.clone(), Some(index))));
    }

    Ok(data
        .get(WORKFLOW_INSTANCE_KEY)
        .map(|run_id| StepKey::new(job_key.clone(), run_id.clone(), None)))
}

/// Reports the end of a step firing to its coordinator. Called by the host
/// when it finalizes a firing.
pub fn deliver_step_signal(signals: &SignalRegistry, context: &ExecutionContext, event: StepEvent) {
    let key = match step_key_for(context.job_key(), context.merged_job_data_map()) {
        Ok(Some(key)) => key,
        Ok(None) => return,
        Err(e) => {
            warn!("⚠️ Firing {} carries broken step data: {}", context.fire_instance_id(), e);
            return;
        }
    };

    let report = StepReport {
        fire_instance_id: context.fire_instance_id().to_string(),
        event,
    };

    if let Err(e) = signals.signal(&key, report) {
        // A retry of a step whose coordinator already moved on lands here
        debug!("🔗 {}", e);
    }
}

/// Per-run bookkeeping shared by both coordinators: releases every waiter of
/// the run when the parent is cancelled, and removes whatever is left of the
/// run when dropped.
struct RunGuard {
    signals: SignalRegistry,
    run_id: String,
    watcher: JoinHandle<()>,
}

impl RunGuard {
    fn new(signals: SignalRegistry, run_id: String, cancellation: CancellationToken) -> Self {
        let watcher = {
            let signals = signals.clone();
            let run_id = run_id.clone();
            tokio::spawn(async move {
                cancellation.cancelled().await;
                let released = signals.release_run(&run_id);
                debug!("🔗 Released {} waiter(s) of cancelled run {}", released, run_id);
            })
        };

        Self {
            signals,
            run_id,
            watcher,
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.watcher.abort();
        self.signals.release_run(&self.run_id);
    }
}

/// Data handed to a step firing: the parent's user data, the step's own data
/// and the coordinator keys. The parent's system keys are not inherited so a
/// step never answers to its grandparent.
fn step_data(
    parent: &ExecutionContext,
    step_data: &DataMap,
    coordinator_keys: &[(&str, String)],
) -> DataMap {
    let mut data = parent.user_data();
    data.extend(step_data.iter().map(|(k, v)| (k.clone(), v.clone())));
    data.extend(
        coordinator_keys
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone())),
    );
    data
}

/// Appends the per-step summary to the parent's log.
async fn append_summary(context: &JobContext, title: &str, steps: &[StepOutcome]) {
    let mut summary = format!("{title}:");
    for step in steps {
        summary.push('\n');
        summary.push_str(&step.summary_line());
    }

    if let Err(e) = context.append_information(summary).await {
        warn!(
            "⚠️ Failed to append step summary to {}: {}",
            context.fire_instance_id(),
            e
        );
    }
}

/// Answers a coordinator wait with `Fail` when the step's firing is vetoed,
/// so the coordinator does not sit out the whole step timeout.
pub struct StepVetoListener {
    signals: SignalRegistry,
}

impl StepVetoListener {
    #[must_use]
    pub const fn new(signals: SignalRegistry) -> Self {
        Self { signals }
    }
}

#[async_trait]
impl JobListener for StepVetoListener {
    fn name(&self) -> &str {
        "step-veto"
    }

    async fn job_execution_vetoed(&self, context: &ExecutionContext) {
        deliver_step_signal(&self.signals, context, StepEvent::Fail);
    }
}
