use time::format_description::parse;
use tracing_subscriber::fmt::time::OffsetTime;

use crate::cli::Commands;

pub fn setup_tracing_for_command(command: &Option<Commands>, server_log_level: &str) {
    // - CLI commands (migrate, monitors, version) use 'warn'/'error' to reduce noise
    // - Server mode uses the configured level
    // - Workers log to stderr only: stdout carries the broker channel
    // - RUST_LOG overrides all of these
    let default_level = match command {
        Some(
            Commands::Migrate { .. } | Commands::Monitors { .. } | Commands::Worker { .. },
        ) => "warn",
        Some(Commands::Version) => "error",
        Some(Commands::Serve) | None => server_log_level,
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
        // Filter out noisy third-party logs
        .add_directive("sqlx::postgres::notice=warn".parse().unwrap())
        .add_directive("sea_orm_migration::migrator=warn".parse().unwrap());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_timer(OffsetTime::new(
            time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC),
            parse("[hour]:[minute]:[second].[subsecond digits:2]").unwrap(),
        ))
        .compact();

    if matches!(command, Some(Commands::Worker { .. })) {
        builder
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        builder.with_ansi(true).init();
    }
}
