use sea_orm::{ConnectOptions, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::{debug, info};

use crate::config::DatabaseConfig;

pub mod migrations;
pub mod models;

/// Connects and brings the schema up to date before anything reads from it.
pub async fn setup_database<AppMigrator: MigratorTrait>(
    db_config: &DatabaseConfig,
) -> Result<sea_orm::DatabaseConnection, DbErr> {
    let connection = setup_database_connection(db_config).await?;

    let pending = AppMigrator::get_pending_migrations(&connection).await?;
    if !pending.is_empty() {
        info!("🗄️ Applying {} pending migration(s)", pending.len());
    }
    AppMigrator::up(&connection, None).await?;

    Ok(connection)
}

pub async fn setup_database_connection(
    db_config: &DatabaseConfig,
) -> Result<sea_orm::DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(db_config.url.clone());

    options.sqlx_logging(false); // Disable SQL query logging to reduce noise
    options.max_connections(db_config.pool_size);

    debug!("Connecting to database at: {}", &db_config.url);

    sea_orm::Database::connect(options).await
}
