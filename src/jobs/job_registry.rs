use std::future::Future;
use std::pin::Pin;
use std::{collections::HashMap, sync::Arc};

use super::{Job, JobContext, JobError};

/// Type alias for job executor function to reduce type complexity
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type JobExecutor =
    Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// Job types known to this process, by name. The host uses it for
/// in-process workers and the `worker` command for out-of-process ones.
#[derive(Clone)]
pub struct JobRegistry {
    jobs: HashMap<&'static str, JobExecutor>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    pub fn register_job<J: Job + 'static>(&mut self) {
        self.jobs.insert(
            J::name(),
            Arc::new(|context: JobContext| {
                Box::pin(async move {
                    let arguments_json = serde_json::to_value(context.execution().user_data())
                        .map_err(|e| JobError::InvalidArguments(e.to_string()))?;
                    let arguments: J::Arguments = serde_json::from_value(arguments_json)
                        .map_err(|e| JobError::InvalidArguments(e.to_string()))?;
                    J::execute(&context, arguments).await
                })
            }),
        );
    }

    pub fn job_names(&self) -> impl Iterator<Item = &&'static str> {
        self.jobs.keys()
    }

    #[must_use]
    pub fn contains(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    pub(crate) async fn execute(
        &self,
        job_type: &str,
        context: JobContext,
    ) -> Result<(), JobError> {
        match self.jobs.get(job_type) {
            Some(executor) => executor(context).await,
            None => Err(JobError::UnknownJobType(job_type.to_string())),
        }
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::broker::{HostChannelHandler, InProcessTransport, MessageBroker};
    use crate::execution::{ExecutionContextBuilder, FireInfo, MetadataHandle};
    use crate::scheduling::{JobDetail, JobKey, Trigger, TriggerKey};

    struct GreetJob;

    #[derive(Deserialize)]
    struct GreetArguments {
        name: String,
    }

    impl Job for GreetJob {
        type Arguments = GreetArguments;

        async fn execute(context: &JobContext, arguments: Self::Arguments) -> Result<(), JobError> {
            context
                .append_information(format!("hello {}", arguments.name))
                .await
        }

        fn name() -> &'static str {
            "greet"
        }
    }

    fn context_for(job: &JobDetail) -> (JobContext, MetadataHandle) {
        let trigger = Trigger::once(
            TriggerKey::new("DEFAULT", "t"),
            job.key.clone(),
            chrono::Utc::now(),
        );
        let execution =
            ExecutionContextBuilder::new("node", "test").build(job, &trigger, FireInfo::now());
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

    #[tokio::test]
    async fn test_registered_job_receives_parsed_arguments() {
        let mut registry = JobRegistry::new();
        registry.register_job::<GreetJob>();

        let job = JobDetail::worker(JobKey::new("DEFAULT", "hello"), "greet")
            .with_data("name", "ada")
            .with_data("__internal", "hidden");
        let (context, metadata) = context_for(&job);

        registry.execute("greet", context).await.unwrap();

        assert_eq!(metadata.snapshot().information, "hello ada");
    }

    #[tokio::test]
    async fn test_missing_argument_is_reported() {
        let mut registry = JobRegistry::new();
        registry.register_job::<GreetJob>();

        let job = JobDetail::worker(JobKey::new("DEFAULT", "hello"), "greet");
        let (context, _) = context_for(&job);

        assert!(matches!(
            registry.execute("greet", context).await,
            Err(JobError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_job_type() {
        let registry = JobRegistry::new();
        let job = JobDetail::worker(JobKey::new("DEFAULT", "x"), "missing");
        let (context, _) = context_for(&job);

        assert!(matches!(
            registry.execute("missing", context).await,
            Err(JobError::UnknownJobType(name)) if name == "missing"
        ));
    }
}
