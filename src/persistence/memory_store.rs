use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use chrono::{Duration, Utc};

use crate::{
    database::models::instance_status::InstanceStatus,
    monitor::{MonitorAction, MonitorRecipient},
};

use super::{fails_in_row, InstanceProgress, JobInstanceLog, JobStore, StoreError};

/// Finished instance logs kept before the oldest are dropped.
pub const DEFAULT_MAX_LOGS: usize = 10_000;
/// Progress snapshots kept before the oldest are dropped.
pub const DEFAULT_MAX_PROGRESS: usize = 1_000;

struct State {
    logs: Vec<JobInstanceLog>,
    progress: VecDeque<InstanceProgress>,
    monitors: Vec<MonitorAction>,
    group_users: HashMap<i32, Vec<MonitorRecipient>>,
    max_logs: usize,
    max_progress: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            logs: Vec::new(),
            progress: VecDeque::new(),
            monitors: Vec::new(),
            group_users: HashMap::new(),
            max_logs: DEFAULT_MAX_LOGS,
            max_progress: DEFAULT_MAX_PROGRESS,
        }
    }
}

impl State {
    /// Drops the oldest finished rows beyond `max_logs`. Running rows stay
    /// until their firing is finalized.
    fn prune_logs(&mut self) {
        while self.logs.len() > self.max_logs {
            let Some(oldest) = self.logs.iter().position(|log| log.status.is_terminal()) else {
                break;
            };
            self.logs.remove(oldest);
        }
    }
}

/// Keeps everything in memory. Used by tests and by `store.type = "memory"`.
/// History is bounded (see [`MemoryStore::with_retention`]).
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retention(self, max_logs: usize, max_progress: usize) -> Self {
        {
            let mut state = self.lock();
            state.max_logs = max_logs;
            state.max_progress = max_progress;
            state.prune_logs();
        }
        self
    }

    #[must_use]
    pub fn with_monitors(self, monitors: Vec<MonitorAction>) -> Self {
        self.set_monitors(monitors);
        self
    }

    pub fn set_monitors(&self, monitors: Vec<MonitorAction>) {
        self.lock().monitors = monitors;
    }

    pub fn add_group_user(&self, group_id: i32, recipient: MonitorRecipient) {
        self.lock()
            .group_users
            .entry(group_id)
            .or_default()
            .push(recipient);
    }

    /// Inserts a finished row directly, e.g. to seed failure history.
    pub fn insert_log(&self, log: JobInstanceLog) {
        let mut state = self.lock();
        state.logs.push(log);
        state.prune_logs();
    }

    pub fn logs(&self) -> Vec<JobInstanceLog> {
        self.lock().logs.clone()
    }

    pub fn log(&self, fire_instance_id: &str) -> Option<JobInstanceLog> {
        self.lock()
            .logs
            .iter()
            .find(|log| log.fire_instance_id == fire_instance_id)
            .cloned()
    }

    pub fn progress_snapshots(&self) -> Vec<InstanceProgress> {
        self.lock().progress.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finished_statuses_newest_first(
        &self,
        job_id: &str,
    ) -> Vec<(chrono::DateTime<Utc>, InstanceStatus)> {
        let mut rows: Vec<_> = self
            .lock()
            .logs
            .iter()
            .filter(|log| log.job_id == job_id && log.status.is_terminal())
            .map(|log| (log.start_date, log.status))
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        rows
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job_instance_log(&self, log: &JobInstanceLog) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.logs.push(log.clone());
        state.prune_logs();
        Ok(())
    }

    async fn update_history_job_run_log(&self, log: &JobInstanceLog) -> Result<(), StoreError> {
        let mut state = self.lock();
        let row = state
            .logs
            .iter_mut()
            .find(|row| row.fire_instance_id == log.fire_instance_id)
            .ok_or_else(|| StoreError::LogNotFound(log.fire_instance_id.clone()))?;
        *row = log.clone();
        state.prune_logs();
        Ok(())
    }

    async fn set_job_instance_log_status(
        &self,
        fire_instance_id: &str,
        status: InstanceStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let row = state
            .logs
            .iter_mut()
            .find(|row| row.fire_instance_id == fire_instance_id)
            .ok_or_else(|| StoreError::LogNotFound(fire_instance_id.to_string()))?;
        row.status = status;
        Ok(())
    }

    async fn persist_job_instance_information(
        &self,
        progress: &InstanceProgress,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(row) = state
            .logs
            .iter_mut()
            .find(|row| row.fire_instance_id == progress.fire_instance_id)
        {
            row.progress = progress.progress;
            row.effected_rows = progress.effected_rows;
            row.information.clone_from(&progress.information);
            row.exception_text.clone_from(&progress.exception_text);
        }
        state.progress.push_back(progress.clone());
        while state.progress.len() > state.max_progress {
            state.progress.pop_front();
        }
        Ok(())
    }

    async fn count_fails_in_row_for_job(
        &self,
        job_id: &str,
        total: u32,
    ) -> Result<u32, StoreError> {
        let rows = self.finished_statuses_newest_first(job_id);
        Ok(fails_in_row(
            rows.into_iter().take(total as usize).map(|(_, status)| status),
        ))
    }

    async fn count_fails_in_hour_for_job(&self, job_id: &str) -> Result<u32, StoreError> {
        let since = Utc::now() - Duration::hours(1);
        let count = self
            .finished_statuses_newest_first(job_id)
            .into_iter()
            .filter(|(start, status)| *start >= since && *status == InstanceStatus::Fail)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn get_monitor_data(&self) -> Result<Vec<MonitorAction>, StoreError> {
        Ok(self.lock().monitors.clone())
    }

    async fn get_group_users(&self, group_id: i32) -> Result<Vec<MonitorRecipient>, StoreError> {
        Ok(self
            .lock()
            .group_users
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
}
