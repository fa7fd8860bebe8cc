use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::info;

use super::{Hook, HookError, MonitorDetails};

/// Hooks known to this process, by name. Built at boot and shared by the
/// monitor engine.
#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `hook` under its own name, replacing a hook of the same name.
    pub fn register(&mut self, hook: impl Hook + 'static) {
        self.register_arc(Arc::new(hook));
    }

    pub fn register_arc(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.insert(hook.name().to_string(), hook);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

/// Writes every notification to the application log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHook;

pub const LOG_HOOK: &str = "log";

#[async_trait]
impl Hook for LogHook {
    fn name(&self) -> &str {
        LOG_HOOK
    }

    async fn handle(&self, details: &MonitorDetails) -> Result<(), HookError> {
        info!(
            "🔔 [{}] {} for {} ({}) on {}{}",
            details.monitor_title,
            details.event_title,
            details.info.job_key,
            details.info.fire_instance_id,
            details.info.environment,
            details
                .info
                .exception_text
                .as_deref()
                .map(|text| format!(": {text}"))
                .unwrap_or_default()
        );
        Ok(())
    }
}
