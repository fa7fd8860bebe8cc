use std::process;

use crate::{
    app::open_store,
    cli::MonitorsAction,
    config::Config,
    monitor::MonitorAction,
    persistence::{JobStore, StoreError},
};

pub async fn handle_monitors_command(config: &Config, action: MonitorsAction) {
    let store = match open_store(config).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("❌ Could not connect to {}: {e}", config.database.url);
            process::exit(1);
        }
    };

    match action {
        MonitorsAction::List => match monitor_lines(store.as_ref()).await {
            Ok(lines) if lines.is_empty() => println!("No monitors defined"),
            Ok(lines) => {
                for line in lines {
                    println!("{line}");
                }
            }
            Err(e) => {
                eprintln!("❌ Failed to load monitors: {e}");
                process::exit(1);
            }
        },
    }
}

pub async fn monitor_lines(store: &dyn JobStore) -> Result<Vec<String>, StoreError> {
    let mut monitors = store.get_monitor_data().await?;
    monitors.sort_by_key(|monitor| monitor.id);

    Ok(monitors.iter().map(describe).collect())
}

fn describe(monitor: &MonitorAction) -> String {
    let scope = match (&monitor.job_id, &monitor.job_group) {
        (Some(job_id), _) => format!("job {job_id}"),
        (None, Some(group)) => format!("group {group}"),
        (None, None) => "global".to_string(),
    };
    let threshold = monitor
        .event_argument
        .as_deref()
        .map(|argument| format!(" x{argument}"))
        .unwrap_or_default();
    let state = if monitor.active { "" } else { " (inactive)" };

    format!(
        "#{} {} [{}{}] on {} -> {}{}",
        monitor.id, monitor.title, monitor.event, threshold, scope, monitor.hook, state
    )
}
