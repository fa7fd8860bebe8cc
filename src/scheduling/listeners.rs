use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    execution::{ExecutionContext, FireInfo},
    jobs::job_result::FiringReport,
};

use super::{JobDetail, Scheduler, Trigger};

/// Observes job-level lifecycle events. Implementations must not panic and
/// must handle their own errors: the scheduler only logs and moves on.
#[async_trait]
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    async fn job_to_be_executed(&self, _context: &ExecutionContext) {}

    async fn job_was_executed(&self, _context: &ExecutionContext, _report: &FiringReport) {}

    async fn job_execution_vetoed(&self, _context: &ExecutionContext) {}
}

/// Observes trigger-level lifecycle events.
#[async_trait]
pub trait TriggerListener: Send + Sync {
    fn name(&self) -> &str;

    /// Called before the execution context is built. Changes made to the
    /// trigger data here are visible to the firing, but only to this firing:
    /// the scheduler hands each firing its own copy of the trigger.
    async fn trigger_fired(&self, _trigger: &mut Trigger) {}

    /// Returning true vetoes the firing.
    async fn veto_job_execution(&self, _trigger: &Trigger, _context: &ExecutionContext) -> bool {
        false
    }

    async fn trigger_misfired(&self, _trigger: &Trigger) {}

    async fn trigger_complete(
        &self,
        _scheduler: &dyn Scheduler,
        _trigger: &Trigger,
        _context: &ExecutionContext,
        _report: &FiringReport,
    ) {
    }
}

/// Executes one firing end-to-end. Implemented by the job host.
#[async_trait]
pub trait FiringRunner: Send + Sync {
    fn build_context(&self, job: &JobDetail, trigger: &Trigger, fire: FireInfo) -> ExecutionContext;

    async fn run(
        &self,
        scheduler: Arc<dyn Scheduler>,
        job: &JobDetail,
        trigger: &Trigger,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> FiringReport;
}
