use async_trait::async_trait;

use crate::{execution::ExecutionContext, scheduling::JobListener};

use super::{MonitorEngine, MonitorEvent, MonitorEventInfo};

/// Raises [`MonitorEvent::ExecutionVetoed`] for firings the scheduler
/// refused to run.
pub struct MonitorVetoListener {
    engine: MonitorEngine,
}

impl MonitorVetoListener {
    #[must_use]
    pub const fn new(engine: MonitorEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobListener for MonitorVetoListener {
    fn name(&self) -> &str {
        "monitor-veto"
    }

    async fn job_execution_vetoed(&self, context: &ExecutionContext) {
        self.engine
            .dispatch(
                MonitorEvent::ExecutionVetoed,
                &MonitorEventInfo::from_context(context),
            )
            .await;
    }
}
