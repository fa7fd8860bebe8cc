use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the scheduler and run configured jobs (default)
    Serve,
    /// Database migration commands
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Monitor definitions
    Monitors {
        #[command(subcommand)]
        action: MonitorsAction,
    },
    /// Show version information
    Version,
    /// Run one job firing as an out-of-process worker. Started by the host,
    /// which talks to it over stdin/stdout.
    #[command(hide = true)]
    Worker {
        /// Registered job type to run
        #[arg(long)]
        job: String,
    },
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run migrations up
    Up {
        /// Number of migrations to run (default: all)
        #[arg(short, long)]
        steps: Option<u32>,
    },
    /// Run migrations down
    Down {
        /// Number of migrations to rollback (default: 1)
        #[arg(short, long, default_value = "1")]
        steps: u32,
    },
    /// Show migration status
    Status,
}

#[derive(Subcommand)]
pub enum MonitorsAction {
    /// List the monitors known to the configured store
    List,
}
