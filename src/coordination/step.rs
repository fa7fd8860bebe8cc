use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use strum::Display as StrumDisplay;

use crate::{jobs::JobError, scheduling::JobKey};

/// Identifies one wait of one coordinator run. Sequence steps carry their
/// position, since a sequence may run the same job twice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub job_key: JobKey,
    pub run_id: String,
    pub index: Option<usize>,
}

impl StepKey {
    pub fn new(job_key: JobKey, run_id: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            job_key,
            run_id: run_id.into(),
            index,
        }
    }
}

impl Display for StepKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}#{} of run {}", self.job_key, index, self.run_id),
            None => write!(f, "{} of run {}", self.job_key, self.run_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
pub enum StepStatus {
    Waiting,
    Start,
    Interrupted,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, StrumDisplay)]
pub enum StepEvent {
    Success,
    Fail,
    Unknown,
}

/// What a finished step firing tells its coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub fire_instance_id: String,
    pub event: StepEvent,
}

/// Final state of one step of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub job_key: JobKey,
    pub index: Option<usize>,
    pub status: StepStatus,
    pub event: StepEvent,
    pub fire_instance_id: Option<String>,
}

impl StepOutcome {
    pub(crate) const fn waiting(job_key: JobKey, index: Option<usize>) -> Self {
        Self {
            job_key,
            index,
            status: StepStatus::Waiting,
            event: StepEvent::Unknown,
            fire_instance_id: None,
        }
    }

    pub(crate) fn finish(&mut self, report: StepReport) {
        self.status = StepStatus::Finish;
        self.event = report.event;
        self.fire_instance_id = Some(report.fire_instance_id);
    }

    /// Display status: `Finish` steps show their event, others their status.
    #[must_use]
    pub fn display_status(&self) -> String {
        match self.status {
            StepStatus::Finish => format!("{} ({})", self.status, self.event),
            status => status.to_string(),
        }
    }

    #[must_use]
    pub fn summary_line(&self) -> String {
        let position = self.index.map(|i| format!("{}. ", i + 1)).unwrap_or_default();
        match &self.fire_instance_id {
            Some(fire_instance_id) => format!(
                "{position}{}: {} [{fire_instance_id}]",
                self.job_key,
                self.display_status()
            ),
            None => format!("{position}{}: {}", self.job_key, self.display_status()),
        }
    }
}

/// Result of a coordinator run: every step's final state plus the outcome of
/// the composite firing.
#[derive(Debug)]
pub struct CoordinatorRun {
    pub steps: Vec<StepOutcome>,
    pub result: Result<(), JobError>,
}

impl CoordinatorRun {
    #[must_use]
    pub fn statuses(&self) -> Vec<StepStatus> {
        self.steps.iter().map(|step| step.status).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_line_shows_event_of_finished_step() {
        let mut step = StepOutcome::waiting(JobKey::new("etl", "load"), Some(1));
        step.finish(StepReport {
            fire_instance_id: "node42".to_string(),
            event: StepEvent::Fail,
        });

        assert_eq!(step.summary_line(), "2. etl.load: Finish (Fail) [node42]");
    }

    #[test]
    fn test_summary_line_of_untouched_step() {
        let step = StepOutcome::waiting(JobKey::new("etl", "load"), None);

        assert_eq!(step.summary_line(), "etl.load: Waiting");
    }
}
