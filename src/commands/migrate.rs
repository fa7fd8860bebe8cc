use std::{cmp, process};

use sea_orm::{DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;

use crate::{cli::MigrateAction, config::Config, database::setup_database_connection};

pub async fn handle_migrate_command<AppMigrator: MigratorTrait>(
    config: &Config,
    action: MigrateAction,
) {
    let db = match setup_database_connection(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("❌ Could not connect to {}: {e}", config.database.url);
            process::exit(1);
        }
    };

    if let Err(e) = run_migration_action::<AppMigrator>(&db, action).await {
        eprintln!("❌ Migration failed: {e}");
        process::exit(1);
    }
}

pub async fn run_migration_action<AppMigrator: MigratorTrait>(
    db: &DatabaseConnection,
    action: MigrateAction,
) -> Result<(), DbErr> {
    match action {
        MigrateAction::Up { steps } => {
            let pending = AppMigrator::get_pending_migrations(db).await?;
            if pending.is_empty() {
                println!("✅ All migrations are already up to date");
                return Ok(());
            }

            let count = steps.map_or(pending.len(), |steps| {
                cmp::min(steps as usize, pending.len())
            });
            println!("Running {count} of {} pending migration(s) up:", pending.len());
            print_names("📄", pending.iter().take(count).map(|m| m.name()));

            AppMigrator::up(db, steps).await?;
            println!("✅ Migrations completed successfully");
        }
        MigrateAction::Down { steps } => {
            let applied = AppMigrator::get_applied_migrations(db).await?;
            if applied.is_empty() {
                println!("❌ No migrations to roll back");
                return Ok(());
            }

            let count = cmp::min(steps as usize, applied.len());
            println!("Rolling back {count} migration(s):");
            print_names("📄", applied.iter().rev().take(count).map(|m| m.name()));

            AppMigrator::down(db, Some(steps)).await?;
            println!("✅ Rollback completed successfully");
        }
        MigrateAction::Status => {
            let pending = AppMigrator::get_pending_migrations(db).await?;
            let applied = AppMigrator::get_applied_migrations(db).await?;

            println!("📋 Applied migrations:");
            print_names("✓", applied.iter().map(|m| m.name()));

            if pending.is_empty() {
                println!("✅ All migrations are up to date");
            } else {
                println!("📋 Pending migrations:");
                print_names("-", pending.iter().map(|m| m.name()));
            }
        }
    }

    Ok(())
}

fn print_names<'a>(marker: &str, names: impl Iterator<Item = &'a str>) {
    for name in names {
        println!("  {marker} {name}");
    }
    println!();
}

