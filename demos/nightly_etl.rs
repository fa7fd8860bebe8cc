use cadence::{
    app_info::AppInfo,
    boot::{boot, BootConfig},
    database::migrations::Migrator,
    jobs::{job_registry::JobRegistry, Job, JobContext, JobError},
    monitor::HookRegistry,
};
use serde::Deserialize;

#[derive(Deserialize)]
struct ImportArguments {
    source: String,
    #[serde(default)]
    batch: Option<String>,
}

struct ImportJob;

impl Job for ImportJob {
    type Arguments = ImportArguments;

    async fn execute(context: &JobContext, arguments: Self::Arguments) -> Result<(), JobError> {
        let batch: i32 = arguments
            .batch
            .as_deref()
            .unwrap_or("100")
            .parse()
            .map_err(|_| JobError::InvalidArguments("batch must be a number".to_string()))?;

        context
            .append_information(format!("importing from {}", arguments.source))
            .await?;

        for step in 1..=10u8 {
            context.fail_on_stop_request().await?;
            context.increase_effected_rows(batch).await?;
            context.update_progress(step * 10).await?;
        }

        Ok(())
    }

    fn name() -> &'static str {
        "import"
    }
}

#[derive(Deserialize)]
struct NoArguments {}

struct ReportJob;

impl Job for ReportJob {
    type Arguments = NoArguments;

    async fn execute(context: &JobContext, _arguments: Self::Arguments) -> Result<(), JobError> {
        let rows = context.get_data("rows").await?.unwrap_or_default();
        context.append_information(format!("report over {rows} rows")).await
    }

    fn name() -> &'static str {
        "report"
    }
}

#[tokio::main]
async fn main() {
    let mut job_registry = JobRegistry::new();
    job_registry.register_job::<ImportJob>();
    job_registry.register_job::<ReportJob>();

    boot::<Migrator>(BootConfig::new(
        AppInfo::new(
            "nightly_etl",
            env!("CARGO_PKG_VERSION"),
            "Imports and reports on a nightly schedule",
        ),
        job_registry,
        HookRegistry::new(),
    ))
    .await;
}
