//! Test doubles shared by the unit tests of every module: a recording
//! scheduler answering coordinator waits, recording and misbehaving hooks, a
//! stub firing runner, scripted jobs and factories for contexts and logs.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{HostChannelHandler, InProcessTransport, MessageBroker},
    coordination::{step_key_for, SignalRegistry, StepEvent, StepReport},
    database::models::instance_status::InstanceStatus,
    execution::{
        DataMap, ExceptionDetail, ExecutionContext, ExecutionContextBuilder, FireInfo,
        MetadataHandle,
    },
    jobs::{
        job_registry::JobRegistry,
        job_result::{FiringReport, FiringStatus},
        Job, JobContext, JobError,
    },
    monitor::{Hook, HookError, MonitorDetails, MonitorEventInfo},
    persistence::JobInstanceLog,
    scheduling::{
        generate_id, FiringRunner, JobDetail, JobKey, JobListener, RunningFiring, Scheduler,
        SchedulerError, Trigger, TriggerKey, TriggerListener, DEFAULT_GROUP,
    },
};

static TRACING_INITIALIZED: std::sync::Once = std::sync::Once::new();

/// Initialize tracing for tests
fn init_tracing() {
    TRACING_INITIALIZED.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Polls `condition` until it holds, failing the test after a while.
pub async fn wait_until(condition: impl Fn() -> bool) {
    init_tracing();
    for _ in 0..500 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn manual_trigger(job: &JobDetail) -> Trigger {
    Trigger::once(TriggerKey::new(DEFAULT_GROUP, "test"), job.key.clone(), Utc::now())
}

pub fn execution_context(job: &JobDetail) -> ExecutionContext {
    init_tracing();
    ExecutionContextBuilder::new("node", "test").build(job, &manual_trigger(job), FireInfo::now())
}

/// A worker-side context wired to an in-process host handler, plus the
/// metadata the handler writes to.
pub fn job_context(job: &JobDetail) -> (JobContext, MetadataHandle) {
    let execution = execution_context(job);
    let metadata = MetadataHandle::new();
    let handler =
        HostChannelHandler::new(metadata.clone(), execution.merged_job_data_map().clone());
    let context = JobContext::new(
        execution,
        MessageBroker::new(InProcessTransport::new(handler)),
        CancellationToken::new(),
    );
    (context, metadata)
}

pub fn finished_log(
    job_id: &str,
    status: InstanceStatus,
    start_date: DateTime<Utc>,
) -> JobInstanceLog {
    JobInstanceLog {
        fire_instance_id: format!("node{}", generate_id()),
        instance_id: "node".to_string(),
        server_name: "localhost".to_string(),
        job_id: job_id.to_string(),
        job_name: "import".to_string(),
        job_group: "etl".to_string(),
        job_type: "import".to_string(),
        trigger_id: generate_id(),
        trigger_name: "nightly".to_string(),
        trigger_group: DEFAULT_GROUP.to_string(),
        fire_time: start_date,
        scheduled_fire_time: Some(start_date),
        start_date,
        end_date: Some(start_date + chrono::Duration::seconds(1)),
        duration_ms: Some(1000),
        status,
        effected_rows: None,
        progress: 100,
        information: None,
        exception_text: None,
        data: None,
    }
}

pub fn event_info(job_key: JobKey, job_id: &str) -> MonitorEventInfo {
    MonitorEventInfo {
        job_key,
        job_id: job_id.to_string(),
        fire_instance_id: format!("node{}", generate_id()),
        fire_time: Utc::now(),
        environment: "test".to_string(),
        exception_text: None,
        duration: None,
        data: DataMap::new(),
    }
}

fn report(
    context: &ExecutionContext,
    status: FiringStatus,
    exceptions: Vec<ExceptionDetail>,
) -> FiringReport {
    FiringReport {
        fire_instance_id: context.fire_instance_id().to_string(),
        status,
        started_at: context.fire_time(),
        duration: Duration::from_secs(1),
        effected_rows: None,
        information: String::new(),
        exceptions,
        job_data_updates: DataMap::new(),
        trigger_data_updates: DataMap::new(),
    }
}

pub fn failed_report(context: &ExecutionContext) -> FiringReport {
    report(context, FiringStatus::Failed, vec![ExceptionDetail::new("scripted failure")])
}

pub fn succeeded_report(context: &ExecutionContext) -> FiringReport {
    report(context, FiringStatus::Succeeded, Vec::new())
}

/// Scheduler double. Records what it is asked to do and, for step firings,
/// answers the coordinator's wait right away: `Success` unless a step was
/// scripted otherwise, no answer at all when scripted with `None`.
#[derive(Default)]
pub struct RecordingScheduler {
    signals: SignalRegistry,
    script: Mutex<HashMap<JobKey, Option<StepEvent>>>,
    triggered: Mutex<Vec<(JobKey, DataMap)>>,
    scheduled: Mutex<Vec<Trigger>>,
}

impl RecordingScheduler {
    pub fn answering(signals: SignalRegistry) -> Self {
        Self {
            signals,
            ..Self::default()
        }
    }

    pub fn script(&self, job_key: JobKey, answer: Option<StepEvent>) {
        lock(&self.script).insert(job_key, answer);
    }

    pub fn triggered(&self) -> Vec<(JobKey, DataMap)> {
        lock(&self.triggered).clone()
    }

    pub fn triggered_keys(&self) -> Vec<JobKey> {
        self.triggered().into_iter().map(|(key, _)| key).collect()
    }

    pub fn scheduled_triggers(&self) -> Vec<Trigger> {
        lock(&self.scheduled).clone()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn schedule_job(&self, _job: JobDetail, trigger: Trigger) -> Result<(), SchedulerError> {
        lock(&self.scheduled).push(trigger);
        Ok(())
    }

    async fn schedule_trigger(&self, trigger: Trigger) -> Result<(), SchedulerError> {
        lock(&self.scheduled).push(trigger);
        Ok(())
    }

    async fn trigger_job(
        &self,
        job_key: &JobKey,
        data: DataMap,
    ) -> Result<TriggerKey, SchedulerError> {
        let answer = lock(&self.script)
            .get(job_key)
            .copied()
            .unwrap_or(Some(StepEvent::Success));
        let step = step_key_for(job_key, &data).ok().flatten();
        lock(&self.triggered).push((job_key.clone(), data));

        if let (Some(event), Some(step)) = (answer, step) {
            let _ = self.signals.signal(
                &step,
                StepReport {
                    fire_instance_id: format!("node{}", generate_id()),
                    event,
                },
            );
        }

        Ok(TriggerKey::new(DEFAULT_GROUP, format!("now.{}", generate_id())))
    }

    async fn get_job_detail(&self, _job_key: &JobKey) -> Option<JobDetail> {
        None
    }

    async fn cancel_running(&self, _fire_instance_id: &str) -> bool {
        false
    }

    fn running_firings(&self) -> Vec<RunningFiring> {
        Vec::new()
    }
}

/// Firing runner that records each context and finishes after `hold`
/// (succeeding unless built with `failing`), or reports `Cancelled` when
/// cancelled first.
pub struct StubRunner {
    contexts: ExecutionContextBuilder,
    hold: Duration,
    outcome: FiringStatus,
    runs: Mutex<Vec<ExecutionContext>>,
}

impl StubRunner {
    pub fn new() -> Self {
        Self::holding(Duration::ZERO)
    }

    pub fn holding(hold: Duration) -> Self {
        init_tracing();
        Self {
            contexts: ExecutionContextBuilder::new("node", "test"),
            hold,
            outcome: FiringStatus::Succeeded,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: FiringStatus::Failed,
            ..Self::new()
        }
    }

    pub fn runs(&self) -> Vec<ExecutionContext> {
        lock(&self.runs).clone()
    }
}

#[async_trait]
impl FiringRunner for StubRunner {
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
        _scheduler: Arc<dyn Scheduler>,
        _job: &JobDetail,
        _trigger: &Trigger,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> FiringReport {
        lock(&self.runs).push(context.clone());
        match tokio::select! {
            () = cancel.cancelled() => FiringStatus::Cancelled,
            () = sleep(self.hold) => self.outcome,
        } {
            FiringStatus::Failed => failed_report(&context),
            status => report(&context, status, Vec::new()),
        }
    }
}

/// Records the name of every lifecycle callback it receives.
#[derive(Default)]
pub struct RecordingListener {
    panics: bool,
    events: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<&'static str> {
        lock(&self.events).clone()
    }

    fn record(&self, event: &'static str) {
        assert!(!self.panics, "listener exploded in {event}");
        lock(&self.events).push(event);
    }
}

#[async_trait]
impl JobListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    async fn job_to_be_executed(&self, _context: &ExecutionContext) {
        self.record("job_to_be_executed");
    }

    async fn job_was_executed(&self, _context: &ExecutionContext, _report: &FiringReport) {
        self.record("job_was_executed");
    }

    async fn job_execution_vetoed(&self, _context: &ExecutionContext) {
        self.record("job_execution_vetoed");
    }
}

#[async_trait]
impl TriggerListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    async fn trigger_fired(&self, _trigger: &mut Trigger) {
        self.record("trigger_fired");
    }

    async fn trigger_misfired(&self, _trigger: &Trigger) {
        self.record("trigger_misfired");
    }

    async fn trigger_complete(
        &self,
        _scheduler: &dyn Scheduler,
        _trigger: &Trigger,
        _context: &ExecutionContext,
        _report: &FiringReport,
    ) {
        self.record("trigger_complete");
    }
}

/// Hook that keeps every invocation.
#[derive(Clone)]
pub struct RecordingHook {
    name: String,
    calls: Arc<Mutex<Vec<MonitorDetails>>>,
}

impl RecordingHook {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<MonitorDetails> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Hook for RecordingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, details: &MonitorDetails) -> Result<(), HookError> {
        lock(&self.calls).push(details.clone());
        Ok(())
    }
}

pub struct FailingHook {
    name: String,
}

impl FailingHook {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Hook for FailingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _details: &MonitorDetails) -> Result<(), HookError> {
        Err(HookError::Failed("hook refused".to_string()))
    }
}

pub struct PanickingHook {
    name: String,
}

impl PanickingHook {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Hook for PanickingHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _details: &MonitorDetails) -> Result<(), HookError> {
        panic!("hook exploded");
    }
}

pub struct SlowHook {
    name: String,
    delay: Duration,
}

impl SlowHook {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl Hook for SlowHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _details: &MonitorDetails) -> Result<(), HookError> {
        sleep(self.delay).await;
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct NoArguments {}

#[derive(Deserialize)]
pub struct EchoArguments {
    message: String,
}

/// Appends `message` to the log, stores it as job data and counts one row.
pub struct EchoJob;

impl Job for EchoJob {
    type Arguments = EchoArguments;

    async fn execute(context: &JobContext, arguments: Self::Arguments) -> Result<(), JobError> {
        context.append_information(arguments.message.clone()).await?;
        context.put_job_data("last_message", arguments.message).await?;
        context.increase_effected_rows(1).await?;
        Ok(())
    }

    fn name() -> &'static str {
        "echo"
    }
}

pub struct FailJob;

impl Job for FailJob {
    type Arguments = NoArguments;

    async fn execute(_context: &JobContext, _arguments: Self::Arguments) -> Result<(), JobError> {
        Err(JobError::Failed("scripted failure".to_string()))
    }

    fn name() -> &'static str {
        "fail"
    }
}

/// Reports an exception through the broker but returns normally.
pub struct AggregateJob;

impl Job for AggregateJob {
    type Arguments = NoArguments;

    async fn execute(context: &JobContext, _arguments: Self::Arguments) -> Result<(), JobError> {
        context
            .add_aggregate_exception(ExceptionDetail::new("row 7 rejected"))
            .await
    }

    fn name() -> &'static str {
        "aggregate"
    }
}

/// Runs until cancelled, then stops as asked.
pub struct PoliteJob;

impl Job for PoliteJob {
    type Arguments = NoArguments;

    async fn execute(context: &JobContext, _arguments: Self::Arguments) -> Result<(), JobError> {
        context.cancellation().cancelled().await;
        context.fail_on_stop_request().await
    }

    fn name() -> &'static str {
        "polite"
    }
}

/// Ignores cancellation entirely.
pub struct StubbornJob;

impl Job for StubbornJob {
    type Arguments = NoArguments;

    async fn execute(_context: &JobContext, _arguments: Self::Arguments) -> Result<(), JobError> {
        sleep(Duration::from_secs(24 * 3600)).await;
        Ok(())
    }

    fn name() -> &'static str {
        "stubborn"
    }
}

/// Reports half progress, then works for a while.
pub struct ProgressJob;

impl Job for ProgressJob {
    type Arguments = NoArguments;

    async fn execute(context: &JobContext, _arguments: Self::Arguments) -> Result<(), JobError> {
        context.update_progress(50).await?;
        sleep(Duration::from_secs(45)).await;
        Ok(())
    }

    fn name() -> &'static str {
        "progress"
    }
}

pub fn scripted_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register_job::<EchoJob>();
    registry.register_job::<FailJob>();
    registry.register_job::<AggregateJob>();
    registry.register_job::<PoliteJob>();
    registry.register_job::<StubbornJob>();
    registry.register_job::<ProgressJob>();
    registry
}
