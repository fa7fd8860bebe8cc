use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures_util::FutureExt;
use tokio::{
    task::JoinSet,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    execution::{DataMap, ExecutionContext, FireInfo},
    retry::{format_span, RETRY_SPAN_KEY},
};

use super::{
    generate_id, FiringRunner, JobDetail, JobKey, JobListener, MisfirePolicy, RunningFiring,
    Scheduler, SchedulerError, Trigger, TriggerKey, TriggerListener, DEFAULT_GROUP,
};

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct LocalSchedulerSettings {
    /// A fire time missed by more than this is handled by the trigger's
    /// misfire policy.
    pub misfire_threshold: Duration,
    /// Retry span for jobs that do not set their own.
    pub default_retry_span: Option<Duration>,
}

impl Default for LocalSchedulerSettings {
    fn default() -> Self {
        Self {
            misfire_threshold: Duration::from_secs(60),
            default_retry_span: None,
        }
    }
}

impl From<&Config> for LocalSchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            misfire_threshold: config.scheduler.misfire_threshold(),
            default_retry_span: config.retry.default_span_secs.map(Duration::from_secs),
        }
    }
}

struct TriggerEntry {
    trigger: Trigger,
    cancel: CancellationToken,
}

struct RunningEntry {
    firing: RunningFiring,
    cancel: CancellationToken,
}

struct Inner {
    runner: Arc<dyn FiringRunner>,
    settings: LocalSchedulerSettings,
    jobs: DashMap<JobKey, JobDetail>,
    triggers: DashMap<TriggerKey, TriggerEntry>,
    running: DashMap<String, RunningEntry>,
    /// Fire instance currently holding each non-concurrent job.
    running_jobs: DashMap<JobKey, String>,
    job_listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    trigger_listeners: RwLock<Vec<Arc<dyn TriggerListener>>>,
    shutdown: CancellationToken,
}

/// Single-process scheduler: one task per trigger sleeps until the next fire
/// time and spawns the firing, which the [`FiringRunner`] executes.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Arc<Inner>,
}

impl LocalScheduler {
    pub fn new(runner: Arc<dyn FiringRunner>, settings: LocalSchedulerSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                settings,
                jobs: DashMap::new(),
                triggers: DashMap::new(),
                running: DashMap::new(),
                running_jobs: DashMap::new(),
                job_listeners: RwLock::new(Vec::new()),
                trigger_listeners: RwLock::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        debug!("📅 Registering job listener '{}'", listener.name());
        self.inner
            .job_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>) {
        debug!("📅 Registering trigger listener '{}'", listener.name());
        self.inner
            .trigger_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    #[must_use]
    pub fn trigger_keys(&self) -> Vec<TriggerKey> {
        self.inner.triggers.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.inner.triggers.get(key).map(|entry| entry.trigger.clone())
    }

    /// Removes a trigger; a firing already in flight is not affected.
    pub fn unschedule_trigger(&self, key: &TriggerKey) -> bool {
        match self.inner.triggers.remove(key) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops every trigger, cancels running firings and waits up to `grace`
    /// for them to finalize.
    pub async fn shutdown(&self, grace: Duration) {
        info!("📅 Scheduler shutting down");
        self.inner.shutdown.cancel();

        let deadline = Instant::now() + grace;
        while !self.inner.running.is_empty() && Instant::now() < deadline {
            sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        let left = self.inner.running.len();
        if left > 0 {
            warn!("📅 {} firing(s) still running after shutdown grace period", left);
        }
    }

    fn job_listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.inner
            .job_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn trigger_listeners(&self) -> Vec<Arc<dyn TriggerListener>> {
        self.inner
            .trigger_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copies the job's retry span into the trigger data unless the trigger
    /// already carries one.
    fn arm_retry(&self, job: &JobDetail, trigger: &mut Trigger) {
        if trigger.data.contains_key(RETRY_SPAN_KEY) || job.key.is_system() {
            return;
        }
        if let Some(span) = job.retry_span.or(self.inner.settings.default_retry_span) {
            trigger
                .data
                .insert(RETRY_SPAN_KEY.to_string(), format_span(span));
        }
    }

    fn insert_trigger(&self, mut trigger: Trigger) -> Result<(), SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Shutdown);
        }
        trigger.validate()?;

        let job = self
            .inner
            .jobs
            .get(&trigger.job_key)
            .map(|job| job.clone())
            .ok_or_else(|| SchedulerError::JobNotFound(trigger.job_key.clone()))?;
        self.arm_retry(&job, &mut trigger);

        let cancel = self.inner.shutdown.child_token();
        match self.inner.triggers.entry(trigger.key.clone()) {
            Entry::Occupied(_) => return Err(SchedulerError::TriggerAlreadyExists(trigger.key)),
            Entry::Vacant(slot) => {
                slot.insert(TriggerEntry {
                    trigger: trigger.clone(),
                    cancel: cancel.clone(),
                });
            }
        }

        debug!("📅 Scheduled trigger {} for job {}", trigger.key, trigger.job_key);
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_trigger(trigger, cancel).await;
        });
        Ok(())
    }

    /// Fire loop of one trigger. The trigger stays registered until its
    /// last firing has completed, so completion listeners still find the job.
    async fn run_trigger(&self, trigger: Trigger, cancel: CancellationToken) {
        let key = trigger.key.clone();
        let mut previous: Option<DateTime<Utc>> = None;
        let mut fired: u32 = 0;
        let mut firings = JoinSet::new();

        loop {
            while firings.try_join_next().is_some() {}

            let next = match trigger.schedule.next_fire_time(trigger.start_at, previous, fired) {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) => {
                    error!("❌ Trigger {} cannot compute its next fire time: {}", key, e);
                    break;
                }
            };

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                () = cancel.cancelled() => {
                    firings.detach_all();
                    return;
                }
                () = sleep(wait) => {}
            }

            let now = Utc::now();
            let late = (now - next).to_std().unwrap_or_default();
            let previous_fire_time = previous;
            fired = fired.saturating_add(1);

            if late > self.inner.settings.misfire_threshold {
                warn!("⏰ Trigger {} misfired by {:?}", key, late);
                // Later fire times are computed from now, so a long stall
                // produces one misfire rather than a burst.
                previous = Some(now);
                for listener in self.trigger_listeners() {
                    isolate(
                        listener.name(),
                        "trigger_misfired",
                        listener.trigger_misfired(&trigger),
                    )
                    .await;
                }
                if trigger.misfire == MisfirePolicy::Skip {
                    continue;
                }
            } else {
                previous = Some(next);
            }

            let fire = FireInfo {
                fire_time: now,
                scheduled_fire_time: Some(next),
                previous_fire_time,
                next_fire_time: trigger
                    .schedule
                    .next_fire_time(trigger.start_at, previous, fired)
                    .ok()
                    .flatten(),
                refire_count: 0,
                recovering: false,
            };

            let Some(job) = self.get_job(&trigger.job_key) else {
                warn!("⚠️ Trigger {} fired for missing job {}", key, trigger.job_key);
                break;
            };
            // The stored trigger carries data written back by earlier firings
            let current = self.trigger(&key).unwrap_or_else(|| trigger.clone());
            let scheduler = self.clone();
            firings.spawn(async move {
                scheduler.execute_firing(job, current, fire).await;
            });
        }

        while firings.join_next().await.is_some() {}

        self.inner.triggers.remove(&key);
        self.remove_orphaned_job(&trigger.job_key);
        debug!("📅 Trigger {} completed", key);
    }

    fn remove_orphaned_job(&self, job_key: &JobKey) {
        let has_triggers = self
            .inner
            .triggers
            .iter()
            .any(|entry| &entry.trigger.job_key == job_key);
        if !has_triggers {
            self.inner.jobs.remove_if(job_key, |_, job| !job.durable);
        }
    }

    async fn execute_firing(&self, job: JobDetail, mut trigger: Trigger, fire: FireInfo) {
        let trigger_listeners = self.trigger_listeners();
        let job_listeners = self.job_listeners();

        for listener in &trigger_listeners {
            isolate(listener.name(), "trigger_fired", listener.trigger_fired(&mut trigger)).await;
        }

        let context = self.inner.runner.build_context(&job, &trigger, fire);

        let mut vetoed = false;
        for listener in &trigger_listeners {
            let veto = AssertUnwindSafe(listener.veto_job_execution(&trigger, &context))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(
                        "💥 Trigger listener '{}' panicked in veto_job_execution",
                        listener.name()
                    );
                    false
                });
            if veto {
                info!("🚫 Listener '{}' vetoed firing of {}", listener.name(), job.key);
                vetoed = true;
                break;
            }
        }

        if !vetoed && !job.concurrent && !self.claim_job(&job.key, context.fire_instance_id()) {
            info!("🚫 Job {} is already running, firing vetoed", job.key);
            vetoed = true;
        }

        if vetoed {
            for listener in &job_listeners {
                isolate(
                    listener.name(),
                    "job_execution_vetoed",
                    listener.job_execution_vetoed(&context),
                )
                .await;
            }
            return;
        }

        self.run_claimed(job, trigger, context, &job_listeners, &trigger_listeners)
            .await;
    }

    fn claim_job(&self, job_key: &JobKey, fire_instance_id: &str) -> bool {
        match self.inner.running_jobs.entry(job_key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(fire_instance_id.to_string());
                true
            }
        }
    }

    async fn run_claimed(
        &self,
        job: JobDetail,
        trigger: Trigger,
        context: ExecutionContext,
        job_listeners: &[Arc<dyn JobListener>],
        trigger_listeners: &[Arc<dyn TriggerListener>],
    ) {
        let fire_instance_id = context.fire_instance_id().to_string();
        let cancel = self.inner.shutdown.child_token();
        self.inner.running.insert(
            fire_instance_id.clone(),
            RunningEntry {
                firing: RunningFiring {
                    fire_instance_id: fire_instance_id.clone(),
                    job_key: job.key.clone(),
                    trigger_key: trigger.key.clone(),
                    fire_time: context.fire_time(),
                },
                cancel: cancel.clone(),
            },
        );

        for listener in job_listeners {
            isolate(
                listener.name(),
                "job_to_be_executed",
                listener.job_to_be_executed(&context),
            )
            .await;
        }

        let scheduler: Arc<dyn Scheduler> = Arc::new(self.clone());
        let report = self
            .inner
            .runner
            .run(scheduler, &job, &trigger, context.clone(), cancel)
            .await;

        self.inner.running.remove(&fire_instance_id);
        self.inner
            .running_jobs
            .remove_if(&job.key, |_, holder| *holder == fire_instance_id);

        self.apply_data_updates(
            &job.key,
            &trigger.key,
            &report.job_data_updates,
            &report.trigger_data_updates,
        );

        for listener in job_listeners {
            isolate(
                listener.name(),
                "job_was_executed",
                listener.job_was_executed(&context, &report),
            )
            .await;
        }
        for listener in trigger_listeners {
            isolate(
                listener.name(),
                "trigger_complete",
                listener.trigger_complete(self, &trigger, &context, &report),
            )
            .await;
        }
    }

    fn apply_data_updates(
        &self,
        job_key: &JobKey,
        trigger_key: &TriggerKey,
        job_updates: &DataMap,
        trigger_updates: &DataMap,
    ) {
        if !job_updates.is_empty() {
            if let Some(mut job) = self.inner.jobs.get_mut(job_key) {
                job.data.extend(job_updates.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        if !trigger_updates.is_empty() {
            if let Some(mut entry) = self.inner.triggers.get_mut(trigger_key) {
                entry
                    .trigger
                    .data
                    .extend(trigger_updates.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }
}

/// Runs one listener callback, logging instead of propagating a panic.
async fn isolate<F: std::future::Future<Output = ()>>(listener: &str, callback: &str, future: F) {
    if AssertUnwindSafe(future).catch_unwind().await.is_err() {
        error!("💥 Listener '{}' panicked in {}", listener, callback);
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn schedule_job(&self, job: JobDetail, trigger: Trigger) -> Result<(), SchedulerError> {
        trigger.validate()?;
        if trigger.job_key != job.key {
            return Err(SchedulerError::JobNotFound(trigger.job_key));
        }

        match self.inner.jobs.entry(job.key.clone()) {
            Entry::Occupied(_) => return Err(SchedulerError::JobAlreadyExists(job.key)),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
            }
        }

        if let Err(e) = self.insert_trigger(trigger) {
            self.inner.jobs.remove(&job.key);
            return Err(e);
        }

        info!("📅 Scheduled job {} ({})", job.key, job.kind.type_name());
        Ok(())
    }

    async fn schedule_trigger(&self, trigger: Trigger) -> Result<(), SchedulerError> {
        self.insert_trigger(trigger)
    }

    async fn trigger_job(
        &self,
        job_key: &JobKey,
        data: DataMap,
    ) -> Result<TriggerKey, SchedulerError> {
        if !self.inner.jobs.contains_key(job_key) {
            return Err(SchedulerError::JobNotFound(job_key.clone()));
        }

        let mut trigger = Trigger::once(
            TriggerKey::new(DEFAULT_GROUP, format!("now.{}", generate_id())),
            job_key.clone(),
            Utc::now(),
        );
        trigger.data = data;
        let key = trigger.key.clone();

        self.insert_trigger(trigger)?;
        debug!("📅 Job {} triggered now as {}", job_key, key);
        Ok(key)
    }

    async fn get_job_detail(&self, job_key: &JobKey) -> Option<JobDetail> {
        self.get_job(job_key)
    }

    async fn cancel_running(&self, fire_instance_id: &str) -> bool {
        match self.inner.running.get(fire_instance_id) {
            Some(entry) => {
                info!("🛑 Cancelling firing {}", fire_instance_id);
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn running_firings(&self) -> Vec<RunningFiring> {
        self.inner
            .running
            .iter()
            .map(|entry| entry.firing.clone())
            .collect()
    }
}

impl LocalScheduler {
    fn get_job(&self, job_key: &JobKey) -> Option<JobDetail> {
        self.inner.jobs.get(job_key).map(|job| job.clone())
    }
}
