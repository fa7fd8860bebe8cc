use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    execution::DataMap,
    jobs::{JobContext, JobError},
    scheduling::JobKey,
};

use super::{
    append_summary, step_data, CoordinatorRun, CoordinatorServices, RunGuard, StepEvent, StepKey,
    StepOutcome, StepStatus, WaitOutcome, SEQUENCE_INSTANCE_KEY, SEQUENCE_JOB_KEY,
    SEQUENCE_STEP_INDEX_KEY, SEQUENCE_TRIGGER_ID_KEY,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub job_key: JobKey,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub data: DataMap,
}

impl SequenceStep {
    #[must_use]
    pub fn new(job_key: JobKey) -> Self {
        Self {
            job_key,
            timeout_secs: None,
            data: DataMap::new(),
        }
    }
}

/// Ordered steps, each fired only after the previous one reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub steps: Vec<SequenceStep>,
    /// Stop at the first failed step instead of running the rest.
    #[serde(default)]
    pub stop_running_on_fail: bool,
}

/// Runs the steps of `definition` in order on behalf of the sequence firing
/// described by `context`.
pub async fn run_sequence(
    definition: &SequenceDefinition,
    context: &JobContext,
    services: &CoordinatorServices,
) -> CoordinatorRun {
    let run_id = context.fire_instance_id().to_string();
    let parent = context.execution();
    let _guard = RunGuard::new(
        services.signals.clone(),
        run_id.clone(),
        context.cancellation().clone(),
    );

    let mut steps: Vec<StepOutcome> = definition
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| StepOutcome::waiting(step.job_key.clone(), Some(index)))
        .collect();
    let mut result = Ok(());
    let mut failed_steps = 0;

    info!(
        "🔗 Sequence {} starting {} step(s)",
        parent.job_key(),
        definition.steps.len()
    );

    for (index, step) in definition.steps.iter().enumerate() {
        if context.cancellation().is_cancelled() {
            result = Err(JobError::Cancelled);
            break;
        }

        let key = StepKey::new(step.job_key.clone(), run_id.clone(), Some(index));
        let handle = services.signals.register(key);
        let data = step_data(
            parent,
            &step.data,
            &[
                (SEQUENCE_INSTANCE_KEY, run_id.clone()),
                (SEQUENCE_STEP_INDEX_KEY, index.to_string()),
                (SEQUENCE_JOB_KEY, parent.job_key().to_string()),
                (SEQUENCE_TRIGGER_ID_KEY, parent.trigger_id().to_string()),
            ],
        );

        steps[index].status = StepStatus::Start;
        if let Err(e) = services.scheduler.trigger_job(&step.job_key, data).await {
            warn!("❌ Sequence step {} could not be fired: {}", step.job_key, e);
            steps[index].status = StepStatus::Interrupted;
            result = Err(e.into());
            break;
        }
        debug!("🔗 Sequence step {} fired, waiting", step.job_key);

        let timeout = step
            .timeout_secs
            .map_or(services.default_step_timeout, Duration::from_secs);

        match handle.wait(timeout, context.cancellation()).await {
            WaitOutcome::Signalled(report) => {
                let failed = report.event == StepEvent::Fail;
                steps[index].finish(report);
                if failed {
                    failed_steps += 1;
                    if definition.stop_running_on_fail {
                        info!("🔗 Sequence step {} failed, stopping", step.job_key);
                        break;
                    }
                }
            }
            WaitOutcome::TimedOut => {
                warn!(
                    "⏰ Sequence step {} did not report within {:?}",
                    step.job_key, timeout
                );
                steps[index].status = StepStatus::Interrupted;
                result = Err(JobError::StepTimeout {
                    step: step.job_key.clone(),
                    timeout,
                });
                break;
            }
            WaitOutcome::Released => {
                steps[index].status = StepStatus::Interrupted;
                result = Err(JobError::Cancelled);
                break;
            }
        }
    }

    if result.is_ok() && failed_steps > 0 {
        result = Err(JobError::Failed(format!(
            "{failed_steps} sequence step(s) failed"
        )));
    }

    append_summary(context, "Sequence steps", &steps).await;

    CoordinatorRun { steps, result }
}
