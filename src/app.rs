use std::{sync::Arc, time::Duration};

use sea_orm::DbErr;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    config::{Config, StoreConfig, GLOBAL_SETTINGS_KEY},
    coordination::{SignalRegistry, StepVetoListener},
    database::setup_database_connection,
    environment::Environment,
    execution::ExecutionContextBuilder,
    jobs::{
        job_host::{JobHost, JobHostSettings},
        job_registry::JobRegistry,
    },
    mailer::{EmailError, Mailer},
    monitor::{
        EmailHook, HookRegistry, LogHook, MonitorEngine, MonitorEngineSettings,
        MonitorVetoListener, EMAIL_HOOK, LOG_HOOK,
    },
    persistence::{DatabaseStore, JobStore, MemoryStore},
    retry::RetryTriggerListener,
    scheduling::{
        local_scheduler::{LocalScheduler, LocalSchedulerSettings},
        Scheduler,
    },
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database connection error: {0}")]
    Database(#[from] DbErr),
    #[error("Mailer setup error: {0}")]
    Mailer(#[from] EmailError),
}

/// The running orchestration core: one store, one monitor engine, one host
/// and the scheduler firing through it.
#[derive(Clone)]
pub struct App {
    pub config: Config,
    pub environment: Environment,
    pub store: Arc<dyn JobStore>,
    pub mailer: Mailer,
    pub monitors: MonitorEngine,
    pub signals: SignalRegistry,
    pub host: JobHost,
    pub scheduler: LocalScheduler,
}

/// Opens the store selected by `store.type`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn JobStore>, DbErr> {
    Ok(match config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Database => {
            Arc::new(DatabaseStore::new(setup_database_connection(&config.database).await?))
        }
    })
}

impl App {
    pub async fn build(
        environment: Environment,
        config: Config,
        job_registry: JobRegistry,
        hooks: HookRegistry,
    ) -> Result<Self, AppError> {
        let store = open_store(&config).await?;
        Self::with_store(environment, config, job_registry, hooks, store)
    }

    /// Wires the app around an already opened store.
    pub fn with_store(
        environment: Environment,
        config: Config,
        job_registry: JobRegistry,
        mut hooks: HookRegistry,
        store: Arc<dyn JobStore>,
    ) -> Result<Self, AppError> {
        let mailer = Mailer::from_config(&config.email)?;

        // Applications may replace the built-in hooks by registering their own
        // under the same name.
        if !hooks.contains(LOG_HOOK) {
            hooks.register(LogHook);
        }
        if !hooks.contains(EMAIL_HOOK) {
            hooks.register(EmailHook::new(mailer.clone()));
        }

        let monitors = MonitorEngine::new(
            store.clone(),
            hooks,
            MonitorEngineSettings::from(&config.monitor),
        );
        let signals = SignalRegistry::new();

        let host = JobHost::new(
            context_builder(&config, environment),
            job_registry,
            store.clone(),
            monitors.clone(),
            signals.clone(),
            JobHostSettings::from(&config),
        );

        let scheduler = LocalScheduler::new(
            Arc::new(host.clone()),
            LocalSchedulerSettings::from(&config),
        );
        scheduler.add_trigger_listener(Arc::new(RetryTriggerListener::new(
            config.retry.max_retries,
            monitors.clone(),
        )));
        scheduler.add_job_listener(Arc::new(MonitorVetoListener::new(monitors.clone())));
        scheduler.add_job_listener(Arc::new(StepVetoListener::new(signals.clone())));

        Ok(Self {
            config,
            environment,
            store,
            mailer,
            monitors,
            signals,
            host,
            scheduler,
        })
    }

    /// Registers every job of `jobs.schedule`. Returns how many were
    /// scheduled; invalid entries are logged and skipped.
    pub async fn schedule_configured_jobs(&self) -> usize {
        let mut scheduled = 0;

        for entry in self.config.jobs.schedule.clone() {
            let key = entry.job_key();
            let (job, trigger) = entry.into_schedule();
            match self.scheduler.schedule_job(job, trigger).await {
                Ok(()) => scheduled += 1,
                Err(e) => error!("❌ Failed to schedule job {}: {}", key, e),
            }
        }

        info!("📅 Scheduled {} configured job(s)", scheduled);
        scheduled
    }

    /// Re-reads monitor definitions every `period` so monitors added while
    /// running take effect. Runs until the task is aborted.
    pub async fn refresh_monitors(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.monitors.cache().reload().await {
                warn!("⚠️ Failed to reload monitors, keeping the previous set: {}", e);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.scheduler
            .shutdown(self.config.jobs.stop_grace_period() + Duration::from_secs(1))
            .await;
    }
}

/// Context builder carrying the per job type settings of `jobs.settings`.
fn context_builder(config: &Config, environment: Environment) -> ExecutionContextBuilder {
    let mut builder =
        ExecutionContextBuilder::new(config.scheduler.instance_id.clone(), environment.to_string());

    for (job_type, settings) in &config.jobs.settings {
        builder = if job_type == GLOBAL_SETTINGS_KEY {
            builder.with_global_settings(settings.clone())
        } else {
            builder.with_job_settings(job_type.clone(), settings.clone())
        };
    }

    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{DataMap, FireInfo};
    use crate::jobs::scheduled_job::ScheduledJob;
    use crate::scheduling::{JobDetail, JobKey, Trigger, TriggerKey};
    use crate::tests::setup_test::scripted_registry;

    fn config() -> Config {
        serde_json::from_value(serde_json::json!({
            "tracing": { "log_level": "info" },
            "email": { "type": "mock" },
            "jobs": {
                "settings": {
                    "global": { "region": "eu", "batch": "100" },
                    "echo": { "batch": "10" },
                },
                "schedule": [
                    {
                        "name": "nightly",
                        "kind": "worker",
                        "job_type": "echo",
                        "cron_expression": "0 0 2 * * *",
                    },
                    {
                        "name": "broken",
                        "kind": "worker",
                        "job_type": "echo",
                        "cron_expression": "whenever",
                    },
                ],
            },
        }))
        .unwrap()
    }

    #[test]
    fn test_job_settings_overlay_global_settings() {
        let builder = context_builder(&config(), Environment::Test);
        let job = JobDetail::worker(JobKey::new("etl", "echo"), "echo");
        let trigger = Trigger::once(
            TriggerKey::new("DEFAULT", "t"),
            job.key.clone(),
            chrono::Utc::now(),
        );

        let context = builder.build(&job, &trigger, FireInfo::now());

        assert_eq!(
            context.job_settings(),
            &DataMap::from([
                ("batch".to_string(), "10".to_string()),
                ("region".to_string(), "eu".to_string()),
            ])
        );
        assert_eq!(context.environment(), "test");
    }

    #[tokio::test]
    async fn test_configured_jobs_are_scheduled_and_invalid_ones_skipped() {
        let app = App::build(Environment::Test, config(), scripted_registry(), HookRegistry::new())
            .await
            .unwrap();

        assert_eq!(app.schedule_configured_jobs().await, 1);
        let nightly = ScheduledJob::worker("nightly", "echo", "0 0 2 * * *").job_key();
        assert!(app.scheduler.get_job_detail(&nightly).await.is_some());
        assert!(app.monitors.hooks().contains(LOG_HOOK));
        assert!(app.monitors.hooks().contains(EMAIL_HOOK));

        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitors_added_while_running_are_picked_up() {
        use crate::monitor::{MonitorAction, MonitorEvent};

        let store = MemoryStore::new();
        let app = App::with_store(
            Environment::Test,
            config(),
            scripted_registry(),
            HookRegistry::new(),
            Arc::new(store.clone()),
        )
        .unwrap();
        assert!(app.monitors.cache().monitors().await.unwrap().is_empty());

        store.set_monitors(vec![MonitorAction::new(
            1,
            "failed",
            MonitorEvent::ExecutionFail,
            LOG_HOOK,
        )]);
        let refresh = tokio::spawn(app.clone().refresh_monitors(Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(app.monitors.cache().monitors().await.unwrap().len(), 1);
        refresh.abort();
    }
}
