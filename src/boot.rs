use std::{env, str::FromStr as _};

use clap::Parser as _;
use config_rs::Config as ConfigRs;
use sea_orm_migration::MigratorTrait;
use tracing::{debug, trace};

use crate::{
    app_info::AppInfo,
    cli::{Cli, Commands},
    commands::{migrate, monitors, serve, version, worker},
    config::Config,
    environment::Environment,
    jobs::job_registry::JobRegistry,
    monitor::HookRegistry,
    setup_tracing::setup_tracing_for_command,
};

const ENVIRONMENT_VARIABLE: &str = "APP_ENVIRONMENT";

/// Configuration for bootstrapping the application.
///
/// The job registry is shared by the scheduler host and by `worker`
/// processes, so both sides resolve the same job types. Hooks registered
/// here replace the built-in ones of the same name.
pub struct BootConfig {
    pub app_info: AppInfo,
    pub job_registry: JobRegistry,
    pub hooks: HookRegistry,
}

impl BootConfig {
    #[must_use]
    pub const fn new(app_info: AppInfo, job_registry: JobRegistry, hooks: HookRegistry) -> Self {
        Self {
            app_info,
            job_registry,
            hooks,
        }
    }
}

pub async fn boot<AppMigrator: MigratorTrait>(config: BootConfig) {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        version::print_version_info(config.app_info);
        return;
    }

    let environment = set_environment();

    let app_config = read_config(environment);

    setup_tracing_for_command(&cli.command, &app_config.tracing.log_level);

    debug!("Environment set to: {:?}", environment);
    trace!("Configuration loaded: {:?}", app_config);

    handle_command::<AppMigrator>(environment, app_config, cli, config).await;
}

#[must_use]
pub fn set_environment() -> Environment {
    env::var(ENVIRONMENT_VARIABLE)
        .ok()
        .and_then(|s| Environment::from_str(&s).ok())
        .unwrap_or_default()
}

/// Reads `config/<environment>` and overlays `APP_*` variables, e.g.
/// `APP_SCHEDULER__INSTANCE_ID`.
pub fn read_config(environment: Environment) -> Config {
    let config_file_name = environment.config_file();

    trace!("Reading configuration from: {}", config_file_name);

    ConfigRs::builder()
        .add_source(config_rs::File::with_name(&config_file_name))
        .add_source(config_rs::Environment::with_prefix("APP").separator("__"))
        .build()
        .unwrap()
        .try_deserialize()
        .expect("Failed to deserialize configuration")
}

pub async fn handle_command<AppMigrator: MigratorTrait>(
    environment: Environment,
    config: Config,
    cli: Cli,
    boot_config: BootConfig,
) {
    match cli.command {
        Some(Commands::Migrate { action }) => {
            migrate::handle_migrate_command::<AppMigrator>(&config, action).await;
        }
        Some(Commands::Monitors { action }) => {
            monitors::handle_monitors_command(&config, action).await;
        }
        Some(Commands::Version) => {
            version::print_version_info(boot_config.app_info);
        }
        Some(Commands::Worker { job }) => {
            worker::handle_worker_command(boot_config.job_registry, &job).await;
        }
        Some(Commands::Serve) | None => {
            serve::handle_serve_command::<AppMigrator>(
                environment,
                config,
                boot_config.job_registry,
                boot_config.hooks,
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;

    #[test]
    fn test_shipped_configs_deserialize() {
        let development = read_config(Environment::Development);
        let test = read_config(Environment::Test);

        assert_eq!(development.scheduler.instance_id, "dev");
        assert_eq!(development.retry.default_span_secs, Some(60));
        assert_eq!(test.store, StoreConfig::Memory);
        assert_eq!(test.jobs.stop_grace_period_secs, 1);
    }
}
