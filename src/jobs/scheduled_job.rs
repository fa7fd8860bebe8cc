use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    execution::DataMap,
    scheduling::{JobDetail, JobKey, JobKind, Trigger, TriggerKey, WorkerMode, DEFAULT_GROUP},
};

/// Scheduled job configuration, as listed under `jobs.schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    #[serde(default = "default_group")]
    pub group: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: JobKind,
    pub cron_expression: String,
    #[serde(default)]
    pub data: DataMap,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_span_secs: Option<u64>,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl ScheduledJob {
    pub fn worker(
        name: impl Into<String>,
        job_type: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            group: default_group(),
            name: name.into(),
            description: None,
            kind: JobKind::Worker {
                job_type: job_type.into(),
                mode: WorkerMode::InProcess,
            },
            cron_expression: cron_expression.into(),
            data: DataMap::new(),
            concurrent: false,
            timeout_secs: None,
            retry_span_secs: None,
        }
    }

    #[must_use]
    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.group.clone(), self.name.clone())
    }

    /// The job definition and its cron trigger. The trigger shares the job's
    /// key.
    #[must_use]
    pub fn into_schedule(self) -> (JobDetail, Trigger) {
        let key = self.job_key();

        let mut job = JobDetail::new(key.clone(), self.kind);
        job.description = self.description;
        job.data = self.data;
        job.concurrent = self.concurrent;
        job.timeout = self.timeout_secs.map(Duration::from_secs);
        job.retry_span = self.retry_span_secs.map(Duration::from_secs);

        let trigger = Trigger::cron(
            TriggerKey::new(key.group.clone(), key.name.clone()),
            key,
            self.cron_expression,
        );

        (job, trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_entry_from_config() {
        let entry: ScheduledJob = serde_json::from_value(serde_json::json!({
            "name": "nightly-import",
            "kind": "worker",
            "job_type": "import",
            "mode": "out_of_process",
            "cron_expression": "0 0 2 * * *",
            "data": { "source": "s3://bucket" },
            "retry_span_secs": 60,
        }))
        .unwrap();

        let (job, trigger) = entry.into_schedule();

        assert_eq!(job.key, JobKey::new("DEFAULT", "nightly-import"));
        assert_eq!(
            job.kind,
            JobKind::Worker {
                job_type: "import".to_string(),
                mode: WorkerMode::OutOfProcess,
            }
        );
        assert_eq!(job.retry_span, Some(Duration::from_secs(60)));
        assert_eq!(job.data.get("source").map(String::as_str), Some("s3://bucket"));
        assert_eq!(trigger.job_key, job.key);
    }

    #[test]
    fn test_sequence_entry_from_config() {
        let entry: ScheduledJob = serde_json::from_value(serde_json::json!({
            "group": "etl",
            "name": "pipeline",
            "kind": "sequence",
            "cron_expression": "0 */5 * * * *",
            "steps": [
                { "job_key": { "group": "etl", "name": "extract" } },
                { "job_key": { "group": "etl", "name": "load" }, "timeout_secs": 30 }
            ],
            "stop_running_on_fail": true,
        }))
        .unwrap();

        let JobKind::Sequence(definition) = entry.kind else {
            panic!("expected a sequence");
        };
        assert_eq!(definition.steps.len(), 2);
        assert!(definition.stop_running_on_fail);
    }
}
