use std::{collections::HashSet, time::Duration};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    execution::DataMap,
    jobs::{JobContext, JobError},
    scheduling::JobKey,
};

use super::{
    append_summary, step_data, CoordinatorRun, CoordinatorServices, RunGuard, StepEvent, StepKey,
    StepOutcome, StepStatus, WaitOutcome, WORKFLOW_INSTANCE_KEY, WORKFLOW_JOB_KEY,
};

/// Which outcome of the dependency releases a dependent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependsOnEvent {
    Success,
    Fail,
    /// Any outcome.
    Finish,
}

impl DependsOnEvent {
    #[must_use]
    pub fn matches(self, event: StepEvent) -> bool {
        match self {
            Self::Finish => true,
            Self::Success => event == StepEvent::Success,
            Self::Fail => event == StepEvent::Fail,
        }
    }

    const fn handles_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Finish)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub job_key: JobKey,
    #[serde(default)]
    pub depends_on_key: Option<JobKey>,
    #[serde(default)]
    pub depends_on_event: Option<DependsOnEvent>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub data: DataMap,
}

impl WorkflowStep {
    #[must_use]
    pub fn root(job_key: JobKey) -> Self {
        Self {
            job_key,
            depends_on_key: None,
            depends_on_event: None,
            timeout_secs: None,
            data: DataMap::new(),
        }
    }

    #[must_use]
    pub fn after(job_key: JobKey, depends_on: JobKey, event: DependsOnEvent) -> Self {
        Self {
            depends_on_key: Some(depends_on),
            depends_on_event: Some(event),
            ..Self::root(job_key)
        }
    }

    const fn is_root(&self) -> bool {
        self.depends_on_key.is_none()
    }

    /// Dependent steps without an explicit event run on any outcome.
    fn event(&self) -> DependsOnEvent {
        self.depends_on_event.unwrap_or(DependsOnEvent::Finish)
    }
}

/// Steps forming a dependency tree; each step depends on at most one other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowValidationError {
    #[error("workflow has no root step")]
    NoRootStep,
    #[error("step '{0}' appears more than once")]
    DuplicateStep(JobKey),
    #[error("step '{step}' depends on unknown step '{depends_on}'")]
    UnknownDependency { step: JobKey, depends_on: JobKey },
    #[error("step '{0}' is part of a dependency cycle")]
    Cycle(JobKey),
    #[error("root step '{0}' must not declare a dependency event")]
    RootWithEvent(JobKey),
}

impl WorkflowDefinition {
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(&step.job_key) {
                return Err(WorkflowValidationError::DuplicateStep(step.job_key.clone()));
            }
            if step.is_root() && step.depends_on_event.is_some() {
                return Err(WorkflowValidationError::RootWithEvent(step.job_key.clone()));
            }
        }

        if !self.steps.iter().any(WorkflowStep::is_root) {
            return Err(WorkflowValidationError::NoRootStep);
        }

        for step in &self.steps {
            if let Some(depends_on) = &step.depends_on_key {
                if !seen.contains(depends_on) {
                    return Err(WorkflowValidationError::UnknownDependency {
                        step: step.job_key.clone(),
                        depends_on: depends_on.clone(),
                    });
                }
            }
        }

        // Every step has at most one parent, so walking up more than
        // `steps.len()` links means a cycle.
        for step in &self.steps {
            let mut current = step;
            let mut hops = 0;
            while let Some(parent) = current
                .depends_on_key
                .as_ref()
                .and_then(|key| self.step(key))
            {
                hops += 1;
                if hops > self.steps.len() {
                    return Err(WorkflowValidationError::Cycle(step.job_key.clone()));
                }
                current = parent;
            }
        }

        Ok(())
    }

    fn step(&self, key: &JobKey) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| &step.job_key == key)
    }

    fn dependents_of<'a>(
        &'a self,
        key: &'a JobKey,
    ) -> impl Iterator<Item = (usize, &'a WorkflowStep)> + 'a {
        self.steps
            .iter()
            .enumerate()
            .filter(move |(_, step)| step.depends_on_key.as_ref() == Some(key))
    }
}

/// Runs the workflow batch by batch: all ready steps of a batch run
/// concurrently, the next batch holds the steps released by their outcomes.
pub async fn run_workflow(
    definition: &WorkflowDefinition,
    context: &JobContext,
    services: &CoordinatorServices,
) -> CoordinatorRun {
    let mut steps: Vec<StepOutcome> = definition
        .steps
        .iter()
        .map(|step| StepOutcome::waiting(step.job_key.clone(), None))
        .collect();

    if let Err(e) = definition.validate() {
        warn!("❌ Workflow {} is invalid: {}", context.execution().job_key(), e);
        return CoordinatorRun {
            steps,
            result: Err(e.into()),
        };
    }

    let run_id = context.fire_instance_id().to_string();
    let parent = context.execution();
    let _guard = RunGuard::new(
        services.signals.clone(),
        run_id.clone(),
        context.cancellation().clone(),
    );

    let mut batch: Vec<usize> = definition
        .steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.is_root())
        .map(|(index, _)| index)
        .collect();
    let mut result: Result<(), JobError> = Ok(());

    info!("🔀 Workflow {} starting with {} root step(s)", parent.job_key(), batch.len());

    while !batch.is_empty() {
        if context.cancellation().is_cancelled() {
            result = Err(JobError::Cancelled);
            break;
        }

        let mut waits = Vec::with_capacity(batch.len());
        for &index in &batch {
            let step = &definition.steps[index];
            let handle = services
                .signals
                .register(StepKey::new(step.job_key.clone(), run_id.clone(), None));
            let data = step_data(
                parent,
                &step.data,
                &[
                    (WORKFLOW_INSTANCE_KEY, run_id.clone()),
                    (WORKFLOW_JOB_KEY, parent.job_key().to_string()),
                ],
            );

            steps[index].status = StepStatus::Start;
            match services.scheduler.trigger_job(&step.job_key, data).await {
                Ok(_) => {
                    let timeout = step
                        .timeout_secs
                        .map_or(services.default_step_timeout, Duration::from_secs);
                    let cancellation = context.cancellation().clone();
                    waits.push(async move {
                        (index, timeout, handle.wait(timeout, &cancellation).await)
                    });
                }
                Err(e) => {
                    warn!("❌ Workflow step {} could not be fired: {}", step.job_key, e);
                    steps[index].status = StepStatus::Interrupted;
                    if result.is_ok() {
                        result = Err(e.into());
                    }
                }
            }
        }

        let mut next = Vec::new();
        for (index, timeout, outcome) in join_all(waits).await {
            let step = &definition.steps[index];
            match outcome {
                WaitOutcome::Signalled(report) => {
                    let event = report.event;
                    steps[index].finish(report);
                    next.extend(
                        definition
                            .dependents_of(&step.job_key)
                            .filter(|(_, dependent)| dependent.event().matches(event))
                            .map(|(dependent_index, _)| dependent_index),
                    );
                }
                WaitOutcome::TimedOut => {
                    warn!(
                        "⏰ Workflow step {} did not report within {:?}",
                        step.job_key, timeout
                    );
                    steps[index].status = StepStatus::Interrupted;
                    if result.is_ok() {
                        result = Err(JobError::StepTimeout {
                            step: step.job_key.clone(),
                            timeout,
                        });
                    }
                }
                WaitOutcome::Released => {
                    steps[index].status = StepStatus::Interrupted;
                    if result.is_ok() {
                        result = Err(JobError::Cancelled);
                    }
                }
            }
        }

        if result.is_err() {
            break;
        }
        batch = next;
    }

    if result.is_ok() {
        let unhandled: Vec<String> = definition
            .steps
            .iter()
            .zip(&steps)
            .filter(|(step, outcome)| {
                outcome.event == StepEvent::Fail
                    && !definition
                        .dependents_of(&step.job_key)
                        .any(|(_, dependent)| dependent.event().handles_failure())
            })
            .map(|(step, _)| step.job_key.to_string())
            .collect();

        if !unhandled.is_empty() {
            result = Err(JobError::Failed(format!(
                "workflow step(s) failed without a failure branch: {}",
                unhandled.join(", ")
            )));
        }
    }

    append_summary(context, "Workflow steps", &steps).await;

    CoordinatorRun { steps, result }
}
