//! Runs one firing from start to finish: instance log row, monitor events,
//! broker, worker launch, hard timeout, progress snapshots and exactly-once
//! finalization.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strum::Display;
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    broker::{HostChannelHandler, InProcessTransport, MessageBroker},
    config::Config,
    coordination::{
        deliver_step_signal, sequence::run_sequence, workflow::run_workflow, CoordinatorServices,
        SignalRegistry, StepEvent,
    },
    database::models::instance_status::InstanceStatus,
    execution::{
        ExceptionDetail, ExecutionContext, ExecutionContextBuilder, FireInfo, MetadataHandle,
    },
    monitor::{MonitorEngine, MonitorEvent, MonitorEventInfo},
    persistence::{InstanceProgress, JobInstanceLog, JobStore},
    scheduling::{FiringRunner, JobDetail, JobKind, Scheduler, Trigger, WorkerMode},
};

use super::{
    job_registry::JobRegistry,
    job_result::{FiringReport, FiringStatus},
    worker::WorkerHandle,
    JobContext, JobError,
};

const PERSIST_RETRIES: u32 = 3;
const PERSIST_RETRY_BASE: Duration = Duration::from_millis(200);
const PERSIST_RETRY_CAP: Duration = Duration::from_secs(2);

/// Lifecycle of one firing inside the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HostState {
    Created,
    Initialized,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
    Finalized,
}

impl From<FiringStatus> for HostState {
    fn from(status: FiringStatus) -> Self {
        match status {
            FiringStatus::Succeeded => Self::Succeeded,
            FiringStatus::Failed => Self::Failed,
            FiringStatus::Cancelled => Self::Cancelled,
            FiringStatus::TimedOut => Self::TimedOut,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobHostSettings {
    pub instance_id: String,
    pub server_name: String,
    /// Hard limit when neither the trigger nor the job sets a timeout.
    pub default_timeout: Duration,
    pub stop_grace_period: Duration,
    pub persist_interval: Duration,
    /// Wait applied to coordinator steps without their own timeout.
    pub step_timeout: Duration,
    /// Binary started for out-of-process workers; the running executable
    /// when unset.
    pub worker_executable: Option<PathBuf>,
}

impl Default for JobHostSettings {
    fn default() -> Self {
        Self {
            instance_id: "cadence".to_string(),
            server_name: "localhost".to_string(),
            default_timeout: Duration::from_secs(3600),
            stop_grace_period: Duration::from_secs(10),
            persist_interval: Duration::from_secs(30),
            step_timeout: Duration::from_secs(3600),
            worker_executable: None,
        }
    }
}

impl From<&Config> for JobHostSettings {
    fn from(config: &Config) -> Self {
        Self {
            instance_id: config.scheduler.instance_id.clone(),
            server_name: config.scheduler.server_name.clone(),
            default_timeout: config.jobs.default_timeout(),
            stop_grace_period: config.jobs.stop_grace_period(),
            persist_interval: config.jobs.persist_interval(),
            step_timeout: Duration::from_secs(config.coordination.step_timeout_secs),
            worker_executable: None,
        }
    }
}

/// State of one firing between launch and finalization. Consumed by
/// [`JobHost::finalize`], so a firing cannot be finalized twice.
struct Firing {
    state: HostState,
    context: ExecutionContext,
    metadata: MetadataHandle,
    handler: HostChannelHandler,
    log: JobInstanceLog,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Firing {
    fn transition(&mut self, next: HostState) {
        trace!(
            "🔄 Firing {} {} -> {}",
            self.context.fire_instance_id(),
            self.state,
            next
        );
        self.state = next;
    }
}

enum Outcome {
    Finished(Result<(), JobError>),
    Cancelled,
    TimedOut(Duration),
}

#[derive(Clone)]
pub struct JobHost {
    contexts: Arc<ExecutionContextBuilder>,
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    monitors: MonitorEngine,
    signals: SignalRegistry,
    settings: Arc<JobHostSettings>,
}

impl JobHost {
    #[must_use]
    pub fn new(
        contexts: ExecutionContextBuilder,
        registry: JobRegistry,
        store: Arc<dyn JobStore>,
        monitors: MonitorEngine,
        signals: SignalRegistry,
        settings: JobHostSettings,
    ) -> Self {
        Self {
            contexts: Arc::new(contexts),
            registry: Arc::new(registry),
            store,
            monitors,
            signals,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub const fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    #[must_use]
    pub const fn monitors(&self) -> &MonitorEngine {
        &self.monitors
    }

    async fn execute(
        &self,
        scheduler: Arc<dyn Scheduler>,
        job: &JobDetail,
        trigger: &Trigger,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> FiringReport {
        let job_type = job.kind.type_name().to_string();
        let metadata = MetadataHandle::new();
        let handler =
            HostChannelHandler::new(metadata.clone(), context.merged_job_data_map().clone());
        let log = JobInstanceLog::start(
            &context,
            &job_type,
            self.contexts.instance_id(),
            &self.settings.server_name,
        )
        .truncated();

        let mut firing = Firing {
            state: HostState::Created,
            context,
            metadata,
            handler,
            log,
            started_at: Utc::now(),
            started: Instant::now(),
        };

        info!(
            "▶️ Firing {} of {} ({})",
            firing.context.fire_instance_id(),
            job.key,
            job_type
        );

        if let Err(e) = self.store.create_job_instance_log(&firing.log).await {
            warn!(
                "⚠️ Failed to create instance log for {}: {}",
                firing.context.fire_instance_id(),
                e
            );
        }
        self.monitors
            .dispatch(
                MonitorEvent::ExecutionStart,
                &MonitorEventInfo::from_context(&firing.context),
            )
            .await;
        firing.transition(HostState::Initialized);

        let worker_token = cancel.child_token();
        let mut worker = match self
            .launch(scheduler, job, &firing, worker_token)
            .await
        {
            Ok(worker) => worker,
            Err(e) => {
                error!(
                    "❌ Failed to launch firing {}: {}",
                    firing.context.fire_instance_id(),
                    e
                );
                firing.metadata.add_exception(ExceptionDetail::new(e.to_string()));
                return self.finalize(firing, FiringStatus::Failed).await;
            }
        };
        firing.transition(HostState::Running);

        let persist_stop = CancellationToken::new();
        let persister = self.spawn_persister(&firing, persist_stop.clone());

        let max_duration = trigger
            .timeout
            .or(job.timeout)
            .unwrap_or(self.settings.default_timeout);

        let outcome = tokio::select! {
            result = worker.wait() => Outcome::Finished(result),
            () = cancel.cancelled() => Outcome::Cancelled,
            () = sleep(max_duration) => Outcome::TimedOut(max_duration),
        };

        if !matches!(outcome, Outcome::Finished(_)) {
            self.stop_worker(&mut worker, &firing).await;
        }

        persist_stop.cancel();
        if let Err(e) = persister.await {
            warn!("⚠️ Progress persister task failed: {}", e);
        }

        let status = match outcome {
            Outcome::Finished(Ok(())) if firing.metadata.has_exceptions() => FiringStatus::Failed,
            Outcome::Finished(Ok(())) => FiringStatus::Succeeded,
            Outcome::Finished(Err(e)) => {
                firing.metadata.add_exception(ExceptionDetail::new(e.to_string()));
                FiringStatus::Failed
            }
            Outcome::Cancelled => {
                firing
                    .metadata
                    .add_exception(ExceptionDetail::new("firing was cancelled"));
                FiringStatus::Cancelled
            }
            Outcome::TimedOut(limit) => {
                firing.metadata.add_exception(ExceptionDetail::new(format!(
                    "firing exceeded its maximum duration of {limit:?}"
                )));
                FiringStatus::TimedOut
            }
        };

        self.finalize(firing, status).await
    }

    async fn launch(
        &self,
        scheduler: Arc<dyn Scheduler>,
        job: &JobDetail,
        firing: &Firing,
        token: CancellationToken,
    ) -> Result<WorkerHandle, JobError> {
        let job_context = || {
            JobContext::new(
                firing.context.clone(),
                MessageBroker::new(InProcessTransport::new(firing.handler.clone())),
                token.clone(),
            )
        };

        match &job.kind {
            JobKind::Worker {
                job_type,
                mode: WorkerMode::InProcess,
            } => {
                if !self.registry.contains(job_type) {
                    return Err(JobError::UnknownJobType(job_type.clone()));
                }
                let registry = self.registry.clone();
                let job_type = job_type.clone();
                let context = job_context();
                Ok(WorkerHandle::spawn_task(
                    async move { registry.execute(&job_type, context).await },
                    token,
                ))
            }
            JobKind::Worker {
                job_type,
                mode: WorkerMode::OutOfProcess,
            } => {
                let executable = match &self.settings.worker_executable {
                    Some(path) => path.clone(),
                    None => std::env::current_exe().map_err(|e| {
                        JobError::Process(format!("cannot locate worker executable: {e}"))
                    })?,
                };
                WorkerHandle::spawn_process(
                    &executable,
                    job_type,
                    &firing.context,
                    firing.handler.clone(),
                    token,
                )
                .await
            }
            JobKind::Sequence(definition) => {
                let definition = definition.clone();
                let services = self.coordinator_services(scheduler);
                let context = job_context();
                Ok(WorkerHandle::spawn_task(
                    async move { run_sequence(&definition, &context, &services).await.result },
                    token,
                ))
            }
            JobKind::Workflow(definition) => {
                let definition = definition.clone();
                let services = self.coordinator_services(scheduler);
                let context = job_context();
                Ok(WorkerHandle::spawn_task(
                    async move { run_workflow(&definition, &context, &services).await.result },
                    token,
                ))
            }
        }
    }

    fn coordinator_services(&self, scheduler: Arc<dyn Scheduler>) -> CoordinatorServices {
        CoordinatorServices {
            scheduler,
            signals: self.signals.clone(),
            default_step_timeout: self.settings.step_timeout,
        }
    }

    /// Cooperative stop first, forced after the grace period.
    async fn stop_worker(&self, worker: &mut WorkerHandle, firing: &Firing) {
        firing.metadata.request_stop();
        worker.cancellation().cancel();

        if timeout(self.settings.stop_grace_period, worker.wait())
            .await
            .is_err()
        {
            warn!(
                "🛑 Firing {} did not stop within {:?}, aborting worker",
                firing.context.fire_instance_id(),
                self.settings.stop_grace_period
            );
            worker.kill().await;
        }
    }

    fn spawn_persister(&self, firing: &Firing, stop: CancellationToken) -> JoinHandle<()> {
        let store = self.store.clone();
        let metadata = firing.metadata.clone();
        let fire_instance_id = firing.context.fire_instance_id().to_string();
        let interval = self.settings.persist_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => return,
                    () = sleep(interval) => {}
                }

                let snapshot = metadata.snapshot();
                let exception_text = snapshot.exceptions_text();
                let progress = InstanceProgress {
                    fire_instance_id: fire_instance_id.clone(),
                    progress: snapshot.progress,
                    effected_rows: snapshot.effected_rows,
                    information: non_empty(snapshot.information),
                    exception_text: non_empty(exception_text),
                };
                persist_with_retry(store.as_ref(), &progress).await;
            }
        })
    }

    async fn finalize(&self, mut firing: Firing, status: FiringStatus) -> FiringReport {
        firing.transition(status.into());

        let snapshot = firing.metadata.snapshot();
        let exception_text = snapshot.exceptions_text();
        let duration = firing.started.elapsed();

        let log = JobInstanceLog {
            end_date: Some(Utc::now()),
            duration_ms: Some(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)),
            status: InstanceStatus::from(status),
            effected_rows: snapshot.effected_rows,
            progress: snapshot.progress,
            information: non_empty(snapshot.information.clone()),
            exception_text: non_empty(exception_text.clone()),
            ..firing.log.clone()
        };
        if let Err(e) = self.store.update_history_job_run_log(&log).await {
            warn!(
                "⚠️ Failed to update instance log of {}: {}, falling back to status only",
                log.fire_instance_id, e
            );
            if let Err(e) = self
                .store
                .set_job_instance_log_status(&log.fire_instance_id, log.status)
                .await
            {
                error!(
                    "❌ Failed to record status of {}: {}",
                    log.fire_instance_id, e
                );
            }
        }

        let info = MonitorEventInfo::from_context(&firing.context)
            .with_exception_text(exception_text)
            .with_duration(duration);
        self.monitors.dispatch(MonitorEvent::ExecutionEnd, &info).await;

        let failed = status != FiringStatus::Succeeded;
        if failed {
            self.monitors.dispatch(MonitorEvent::ExecutionFail, &info).await;
            self.monitors
                .dispatch(MonitorEvent::ExecutionFailxTimesInRow, &info)
                .await;
            self.monitors
                .dispatch(MonitorEvent::ExecutionFailxTimesInHour, &info)
                .await;
        } else {
            self.monitors.dispatch(MonitorEvent::ExecutionSuccess, &info).await;
        }

        deliver_step_signal(
            &self.signals,
            &firing.context,
            if failed { StepEvent::Fail } else { StepEvent::Success },
        );

        let report = FiringReport {
            fire_instance_id: firing.context.fire_instance_id().to_string(),
            status,
            started_at: firing.started_at,
            duration,
            effected_rows: snapshot.effected_rows,
            information: snapshot.information,
            exceptions: snapshot.exceptions,
            job_data_updates: firing.handler.job_data_updates(),
            trigger_data_updates: firing.handler.trigger_data_updates(),
        };

        firing.transition(HostState::Finalized);
        if failed {
            warn!(
                "❌ Firing {} {} after {:?}",
                report.fire_instance_id, status, duration
            );
        } else {
            info!("✅ Firing {} succeeded after {:?}", report.fire_instance_id, duration);
        }
        report
    }
}

#[async_trait]
impl FiringRunner for JobHost {
    fn build_context(
        &self,
        job: &JobDetail,
        trigger: &Trigger,
        fire: FireInfo,
    ) -> ExecutionContext {
        self.contexts.build(job, trigger, fire)
    }

    async fn run(
        &self,
        scheduler: Arc<dyn Scheduler>,
        job: &JobDetail,
        trigger: &Trigger,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> FiringReport {
        self.execute(scheduler, job, trigger, context, cancel).await
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

async fn persist_with_retry(store: &dyn JobStore, progress: &InstanceProgress) {
    let mut delay = PERSIST_RETRY_BASE;
    let mut attempt = 0;

    loop {
        match store.persist_job_instance_information(progress).await {
            Ok(()) => return,
            Err(e) if attempt >= PERSIST_RETRIES => {
                warn!(
                    "⚠️ Giving up persisting progress of {}: {}",
                    progress.fire_instance_id, e
                );
                return;
            }
            Err(e) => {
                attempt += 1;
                debug!(
                    "💾 Persisting progress of {} failed (attempt {}): {}",
                    progress.fire_instance_id, attempt, e
                );
                // Jitter so concurrent firings do not retry in lockstep
                sleep(delay + Duration::from_millis(fastrand::u64(0..50))).await;
                delay = (delay * 2).min(PERSIST_RETRY_CAP);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::coordination::{
        sequence::{SequenceDefinition, SequenceStep},
        StepKey, WaitOutcome, SEQUENCE_INSTANCE_KEY, SEQUENCE_STEP_INDEX_KEY,
    };
    use crate::execution::DataMap;
    use crate::monitor::{HookRegistry, MonitorAction, MonitorEngineSettings};
    use crate::persistence::MemoryStore;
    use crate::scheduling::{JobKey, LocalScheduler, TriggerKey};
    use crate::scheduling::local_scheduler::LocalSchedulerSettings;
    use crate::tests::setup_test::{
        scripted_registry, wait_until, RecordingHook, RecordingScheduler,
    };

    struct Harness {
        host: JobHost,
        store: MemoryStore,
        recording: RecordingHook,
    }

    fn harness(settings: JobHostSettings) -> Harness {
        let store = MemoryStore::new();
        let recording = RecordingHook::new("recording");
        let mut hooks = HookRegistry::new();
        hooks.register(recording.clone());
        let monitors = MonitorEngine::new(
            Arc::new(store.clone()),
            hooks,
            MonitorEngineSettings {
                include_global_monitors: true,
                ..MonitorEngineSettings::default()
            },
        );
        store.set_monitors(
            [
                MonitorEvent::ExecutionStart,
                MonitorEvent::ExecutionEnd,
                MonitorEvent::ExecutionSuccess,
                MonitorEvent::ExecutionFail,
            ]
            .into_iter()
            .enumerate()
            .map(|(id, event)| {
                MonitorAction::new(i32::try_from(id).unwrap(), "all", event, "recording")
            })
            .collect(),
        );

        let host = JobHost::new(
            ExecutionContextBuilder::new("node", "test"),
            scripted_registry(),
            Arc::new(store.clone()),
            monitors,
            SignalRegistry::new(),
            settings,
        );
        Harness {
            host,
            store,
            recording,
        }
    }

    fn once(job: &JobDetail) -> Trigger {
        Trigger::once(TriggerKey::new("DEFAULT", "now"), job.key.clone(), Utc::now())
    }

    async fn fire(
        harness: &Harness,
        job: &JobDetail,
        trigger: &Trigger,
        cancel: CancellationToken,
    ) -> FiringReport {
        let context = harness.host.build_context(job, trigger, FireInfo::now());
        let scheduler: Arc<dyn Scheduler> =
            Arc::new(RecordingScheduler::answering(SignalRegistry::new()));
        harness.host.run(scheduler, job, trigger, context, cancel).await
    }

    fn events(harness: &Harness) -> Vec<MonitorEvent> {
        harness.recording.calls().iter().map(|call| call.event).collect()
    }

    #[tokio::test]
    async fn test_successful_firing_is_logged_and_reported() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "echo"), "echo")
            .with_data("message", "hello");

        let report = fire(&harness, &job, &once(&job), CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::Succeeded);
        assert_eq!(report.effected_rows, Some(1));
        assert_eq!(report.information, "hello");
        assert_eq!(
            report.job_data_updates.get("last_message").map(String::as_str),
            Some("hello")
        );

        let log = harness.store.log(&report.fire_instance_id).unwrap();
        assert_eq!(log.status, InstanceStatus::Success);
        assert_eq!(log.job_type, "echo");
        assert_eq!(log.information.as_deref(), Some("hello"));
        assert!(log.end_date.is_some());

        assert_eq!(
            events(&harness),
            vec![
                MonitorEvent::ExecutionStart,
                MonitorEvent::ExecutionEnd,
                MonitorEvent::ExecutionSuccess,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_job_records_exception() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "fail"), "fail");

        let report = fire(&harness, &job, &once(&job), CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::Failed);
        assert_eq!(report.exceptions_text(), "scripted failure");
        let log = harness.store.log(&report.fire_instance_id).unwrap();
        assert_eq!(log.status, InstanceStatus::Fail);
        assert_eq!(log.exception_text.as_deref(), Some("scripted failure"));
        assert_eq!(
            events(&harness),
            vec![
                MonitorEvent::ExecutionStart,
                MonitorEvent::ExecutionEnd,
                MonitorEvent::ExecutionFail,
            ]
        );
    }

    #[tokio::test]
    async fn test_aggregate_exception_fails_a_returning_job() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "aggregate"), "aggregate");

        let report = fire(&harness, &job, &once(&job), CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::Failed);
        assert_eq!(report.exceptions_text(), "row 7 rejected");
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_without_running() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "ghost"), "ghost");

        let report = fire(&harness, &job, &once(&job), CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::Failed);
        assert!(report.exceptions_text().contains("ghost"));
        assert_eq!(
            harness.store.log(&report.fire_instance_id).unwrap().status,
            InstanceStatus::Fail
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_cooperative_worker() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "polite"), "polite")
            .with_timeout(Duration::from_secs(60));

        let report = fire(&harness, &job, &once(&job), CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::TimedOut);
        assert!(report.exceptions_text().contains("maximum duration"));
        assert!(report.duration < Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_timeout_wins_and_stubborn_worker_is_aborted() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "stubborn"), "stubborn")
            .with_timeout(Duration::from_secs(600));
        let trigger = once(&job).with_timeout(Duration::from_secs(5));

        let report = fire(&harness, &job, &trigger, CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::TimedOut);
        // 5s limit plus the 10s grace period
        assert!(report.duration >= Duration::from_secs(15));
        assert!(report.duration < Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_fails_the_firing() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "polite"), "polite");
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let report = fire(&harness, &job, &once(&job), cancel).await;

        assert_eq!(report.status, FiringStatus::Cancelled);
        assert!(report.failed());
        assert_eq!(
            harness.store.log(&report.fire_instance_id).unwrap().status,
            InstanceStatus::Fail
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_persisted_while_running() {
        let harness = harness(JobHostSettings {
            persist_interval: Duration::from_secs(10),
            ..JobHostSettings::default()
        });
        let job = JobDetail::worker(JobKey::new("etl", "progress"), "progress");

        let report = fire(&harness, &job, &once(&job), CancellationToken::new()).await;

        assert_eq!(report.status, FiringStatus::Succeeded);
        let snapshots = harness.store.progress_snapshots();
        assert!(!snapshots.is_empty());
        assert!(snapshots.iter().all(|s| s.fire_instance_id == report.fire_instance_id));
        assert_eq!(snapshots.last().unwrap().progress, 50);
    }

    #[tokio::test]
    async fn test_step_firing_signals_its_coordinator() {
        let harness = harness(JobHostSettings::default());
        let job = JobDetail::worker(JobKey::new("etl", "fail"), "fail");
        let trigger = once(&job)
            .with_data(SEQUENCE_INSTANCE_KEY, "run-1")
            .with_data(SEQUENCE_STEP_INDEX_KEY, "0");
        let wait = harness
            .host
            .signals()
            .register(StepKey::new(job.key.clone(), "run-1", Some(0)));

        let report = fire(&harness, &job, &trigger, CancellationToken::new()).await;

        match wait.wait(Duration::from_secs(1), &CancellationToken::new()).await {
            WaitOutcome::Signalled(step) => {
                assert_eq!(step.event, StepEvent::Fail);
                assert_eq!(step.fire_instance_id, report.fire_instance_id);
            }
            other => panic!("expected a signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sequence_runs_through_local_scheduler() {
        let harness = harness(JobHostSettings::default());
        let scheduler = LocalScheduler::new(
            Arc::new(harness.host.clone()),
            LocalSchedulerSettings::default(),
        );

        let extract = JobDetail::worker(JobKey::new("etl", "extract"), "echo")
            .with_data("message", "extracted");
        let load = JobDetail::worker(JobKey::new("etl", "load"), "echo")
            .with_data("message", "loaded");
        let pipeline = JobDetail::new(
            JobKey::new("etl", "pipeline"),
            JobKind::Sequence(SequenceDefinition {
                steps: vec![
                    SequenceStep::new(extract.key.clone()),
                    SequenceStep::new(load.key.clone()),
                ],
                stop_running_on_fail: true,
            }),
        );

        let far_future = |job: &JobDetail| {
            Trigger::once(
                TriggerKey::new("DEFAULT", format!("{}-manual", job.key.name)),
                job.key.clone(),
                Utc::now() + chrono::Duration::days(365),
            )
        };
        for job in [&extract, &load, &pipeline] {
            scheduler.schedule_job(job.clone(), far_future(job)).await.unwrap();
        }

        scheduler.trigger_job(&pipeline.key, DataMap::new()).await.unwrap();

        wait_until(|| {
            harness
                .store
                .logs()
                .iter()
                .filter(|log| log.end_date.is_some())
                .count()
                == 3
        })
        .await;

        let logs = harness.store.logs();
        let parent = logs.iter().find(|log| log.job_type == "sequence").unwrap();
        assert_eq!(parent.status, InstanceStatus::Success);
        assert!(parent
            .information
            .as_deref()
            .unwrap()
            .contains("2. etl.load: Finish (Success)"));
        assert!(logs.iter().all(|log| log.status == InstanceStatus::Success));
        assert_eq!(harness.host.signals().pending(), 0);
    }
}
