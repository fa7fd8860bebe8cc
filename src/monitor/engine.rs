use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::{config::MonitorConfig, execution::DataMap, persistence::JobStore};

use super::{
    HookRegistry, MonitorAction, MonitorCache, MonitorDetails, MonitorEvent, MonitorEventInfo,
};

#[derive(Debug, Clone)]
pub struct MonitorEngineSettings {
    pub hook_timeout: Duration,
    pub include_global_monitors: bool,
    pub global_config: DataMap,
}

impl Default for MonitorEngineSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorEngineSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            hook_timeout: Duration::from_secs(config.hook_timeout_secs),
            include_global_monitors: config.include_global_monitors,
            global_config: config.global_config.clone(),
        }
    }
}

/// Active monitors of `event` whose scope covers the firing job.
#[must_use]
pub fn select_monitors(
    monitors: &[MonitorAction],
    event: MonitorEvent,
    job_id: &str,
    job_group: &str,
    include_global: bool,
) -> Vec<MonitorAction> {
    monitors
        .iter()
        .filter(|monitor| monitor.active && monitor.event == event)
        .filter(|monitor| match (&monitor.job_id, &monitor.job_group) {
            (Some(id), _) => id == job_id,
            (None, Some(group)) => group == job_group,
            (None, None) => include_global,
        })
        .cloned()
        .collect()
}

/// Evaluates and dispatches monitors. Cheap to clone; every clone shares the
/// same cache.
#[derive(Clone)]
pub struct MonitorEngine {
    cache: MonitorCache,
    store: Arc<dyn JobStore>,
    hooks: Arc<HookRegistry>,
    settings: Arc<MonitorEngineSettings>,
}

impl MonitorEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        hooks: HookRegistry,
        settings: MonitorEngineSettings,
    ) -> Self {
        Self {
            cache: MonitorCache::new(store.clone()),
            store,
            hooks: Arc::new(hooks),
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &MonitorCache {
        &self.cache
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Runs every monitor matching `event` for the firing described by
    /// `info`, concurrently. Returns the number of hooks that completed
    /// successfully; failures are logged and never surface to the caller.
    pub async fn dispatch(&self, event: MonitorEvent, info: &MonitorEventInfo) -> usize {
        if info.job_key.is_system() {
            return 0;
        }

        let monitors = match self.cache.monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                error!("❌ Failed to load monitors for {}: {}", event, e);
                return 0;
            }
        };

        let selected = select_monitors(
            &monitors,
            event,
            &info.job_id,
            &info.job_key.group,
            self.settings.include_global_monitors,
        );
        if selected.is_empty() {
            return 0;
        }

        debug!(
            "🔔 {} monitor(s) in scope of {} for {}",
            selected.len(),
            event,
            info.job_key
        );

        let mut labels = Vec::with_capacity(selected.len());
        let mut tasks = Vec::with_capacity(selected.len());
        for monitor in selected {
            labels.push(format!("{} '{}' ({})", monitor.id, monitor.title, monitor.hook));
            let engine = self.clone();
            let info = info.clone();
            tasks.push(tokio::spawn(async move { engine.run_monitor(monitor, info).await }));
        }

        join_all(tasks)
            .await
            .into_iter()
            .zip(labels)
            .filter(|(result, label)| match result {
                Ok(done) => *done,
                Err(e) => {
                    error!("💥 Monitor {} crashed: {}", label, e);
                    false
                }
            })
            .count()
    }

    async fn run_monitor(&self, monitor: MonitorAction, info: MonitorEventInfo) -> bool {
        if !self.predicate_passes(&monitor).await {
            return false;
        }

        let Some(hook) = self.hooks.get(&monitor.hook) else {
            warn!(
                "⚠️ Monitor {} '{}' uses unknown hook '{}'",
                monitor.id, monitor.title, monitor.hook
            );
            return false;
        };

        let recipients = match monitor.group_id {
            Some(group_id) => self.store.get_group_users(group_id).await.unwrap_or_else(|e| {
                warn!(
                    "⚠️ Could not resolve recipients of group {} for monitor {}: {}",
                    group_id, monitor.id, e
                );
                Vec::new()
            }),
            None => Vec::new(),
        };

        let details = MonitorDetails {
            event: monitor.event,
            event_title: monitor.event.title().to_string(),
            monitor_id: monitor.id,
            monitor_title: monitor.title.clone(),
            group_id: monitor.group_id,
            recipients,
            info,
            global_config: self.settings.global_config.clone(),
        };

        match timeout(self.settings.hook_timeout, hook.handle(&details)).await {
            Ok(Ok(())) => {
                debug!(
                    "🔔 Monitor {} '{}' notified via {}",
                    monitor.id, monitor.title, monitor.hook
                );
                true
            }
            Ok(Err(e)) => {
                warn!(
                    "⚠️ Hook '{}' of monitor {} '{}' failed: {}",
                    monitor.hook, monitor.id, monitor.title, e
                );
                false
            }
            Err(_) => {
                warn!(
                    "⏰ Hook '{}' of monitor {} '{}' did not finish within {:?}",
                    monitor.hook, monitor.id, monitor.title, self.settings.hook_timeout
                );
                false
            }
        }
    }

    /// Plain events always pass. The counting events need a job id scope and
    /// a numeric threshold; anything else fails closed.
    async fn predicate_passes(&self, monitor: &MonitorAction) -> bool {
        let minimum = match monitor.event {
            MonitorEvent::ExecutionFailxTimesInRow => 2,
            MonitorEvent::ExecutionFailxTimesInHour => 1,
            _ => return true,
        };

        let Some(job_id) = monitor.job_id.as_deref() else {
            warn!(
                "⚠️ Monitor {} '{}' counts failures but is not bound to a job id",
                monitor.id, monitor.title
            );
            return false;
        };

        let threshold = monitor
            .event_argument
            .as_deref()
            .and_then(|argument| argument.trim().parse::<u32>().ok())
            .filter(|threshold| *threshold >= minimum);
        let Some(threshold) = threshold else {
            warn!(
                "⚠️ Monitor {} '{}' has invalid threshold {:?} (minimum {})",
                monitor.id, monitor.title, monitor.event_argument, minimum
            );
            return false;
        };

        let count = if monitor.event == MonitorEvent::ExecutionFailxTimesInRow {
            self.store.count_fails_in_row_for_job(job_id, threshold).await
        } else {
            self.store.count_fails_in_hour_for_job(job_id).await
        };

        match count {
            Ok(count) => count >= threshold,
            Err(e) => {
                warn!(
                    "⚠️ Could not count failures of job {} for monitor {}: {}",
                    job_id, monitor.id, e
                );
                false
            }
        }
    }
}
