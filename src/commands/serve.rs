use std::sync::Arc;

use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

use crate::{
    app::App,
    config::{Config, StoreConfig},
    database::setup_database,
    environment::Environment,
    jobs::job_registry::JobRegistry,
    monitor::HookRegistry,
    persistence::{DatabaseStore, JobStore, MemoryStore},
};

pub async fn handle_serve_command<AppMigrator: MigratorTrait>(
    environment: Environment,
    config: Config,
    job_registry: JobRegistry,
    hooks: HookRegistry,
) {
    // The migrated connection is the one the app keeps using
    let store: Arc<dyn JobStore> = match config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Database => match setup_database::<AppMigrator>(&config.database).await {
            Ok(db) => {
                info!("✅ Database is ready!");
                Arc::new(DatabaseStore::new(db))
            }
            Err(e) => {
                error!("❌ Database setup failed: {}", e);
                return;
            }
        },
    };

    let app = match App::with_store(environment, config, job_registry, hooks, store) {
        Ok(app) => app,
        Err(e) => {
            error!("❌ Failed to start: {}", e);
            return;
        }
    };

    app.schedule_configured_jobs().await;
    let refresh = tokio::spawn(
        app.clone()
            .refresh_monitors(app.config.monitor.reload_interval()),
    );
    info!(
        "🚀 Scheduler {} running on {}",
        app.config.scheduler.instance_id, app.config.scheduler.server_name
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for shutdown signal: {}", e);
    }

    info!("🛑 Shutting down, waiting for running jobs...");
    refresh.abort();
    app.shutdown().await;
    info!("👋 Stopped");
}
