use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, time::Duration};

use lettre::message::Mailbox;

use crate::{execution::DataMap, jobs::scheduled_job::ScheduledJob};

/// Key of `jobs.settings` holding the settings shared by every job type.
pub const GLOBAL_SETTINGS_KEY: &str = "global";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub tracing: TracingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailConfig {
    /// Mock mailer that captures emails for testing
    Mock,
    /// Real SMTP configuration for sending emails
    Smtp {
        host: String,
        port: u16,
        #[serde(deserialize_with = "deserialize_mailbox")]
        sender: Mailbox,
        username: Option<String>,
        password: Option<String>,
        #[serde(default = "default_use_tls")]
        use_tls: bool,
    },
}

fn deserialize_mailbox<'de, D>(deserializer: D) -> Result<Mailbox, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn default_use_tls() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TracingConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            pool_size: 5,
        }
    }
}

/// Where instance logs and monitor definitions live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Prefix of every fire instance id produced by this node.
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// A firing later than this is a misfire and handled by the trigger's
    /// misfire policy.
    #[serde(default = "default_misfire_threshold_ms")]
    pub misfire_threshold_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            server_name: default_server_name(),
            misfire_threshold_ms: default_misfire_threshold_ms(),
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn misfire_threshold(&self) -> Duration {
        Duration::from_millis(self.misfire_threshold_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Hard limit of a firing when neither trigger nor job sets one
    /// (default: 3600)
    #[serde(default = "default_job_timeout")]
    pub default_timeout_secs: u64,
    /// Time a stopped worker gets to wind down before it is aborted
    /// (default: 10)
    #[serde(default = "default_stop_grace_period")]
    pub stop_grace_period_secs: u64,
    /// Interval between progress snapshots of running firings (default: 30)
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,
    /// Per job type settings; the `global` entry applies to every type.
    #[serde(default)]
    pub settings: HashMap<String, DataMap>,
    #[serde(default)]
    pub schedule: Vec<ScheduledJob>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_job_timeout(),
            stop_grace_period_secs: default_stop_grace_period(),
            persist_interval_secs: default_persist_interval(),
            settings: HashMap::new(),
            schedule: Vec::new(),
        }
    }
}

impl JobsConfig {
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    #[must_use]
    pub const fn stop_grace_period(&self) -> Duration {
        Duration::from_secs(self.stop_grace_period_secs)
    }

    #[must_use]
    pub const fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts for failed firings (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Retry span for jobs that do not set their own; no retries when unset
    #[serde(default)]
    pub default_span_secs: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            default_span_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Upper bound of one hook invocation (default: 30)
    #[serde(default = "default_hook_timeout")]
    pub hook_timeout_secs: u64,
    /// Whether monitors with neither a job id nor a job group apply to
    /// every job.
    #[serde(default)]
    pub include_global_monitors: bool,
    /// Free-form settings handed to every hook.
    #[serde(default)]
    pub global_config: DataMap,
    /// How often `serve` re-reads monitor definitions from the store
    /// (default: 60)
    #[serde(default = "default_monitor_reload_interval")]
    pub reload_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            hook_timeout_secs: default_hook_timeout(),
            include_global_monitors: false,
            global_config: DataMap::new(),
            reload_interval_secs: default_monitor_reload_interval(),
        }
    }
}

impl MonitorConfig {
    #[must_use]
    pub const fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

const fn default_monitor_reload_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// How long a sequence or workflow waits for a step without its own
    /// timeout (default: 3600)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: default_step_timeout(),
        }
    }
}

fn default_instance_id() -> String {
    "cadence".to_string()
}

fn default_server_name() -> String {
    "localhost".to_string()
}

const fn default_misfire_threshold_ms() -> u64 {
    60_000
}

const fn default_job_timeout() -> u64 {
    3600 // 1 hour
}

const fn default_stop_grace_period() -> u64 {
    10
}

const fn default_persist_interval() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_hook_timeout() -> u64 {
    30
}

const fn default_step_timeout() -> u64 {
    3600 // 1 hour
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_fall_back_to_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "tracing": { "log_level": "info" },
            "email": { "type": "mock" },
        }))
        .unwrap();

        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.retry.max_retries, 3);
        assert!(!config.monitor.include_global_monitors);
        assert_eq!(config.jobs.default_timeout(), Duration::from_secs(3600));
        assert_eq!(config.coordination.step_timeout_secs, 3600);
    }

    #[test]
    fn test_smtp_sender_is_parsed() {
        let config: EmailConfig = serde_json::from_value(serde_json::json!({
            "type": "smtp",
            "host": "smtp.example.com",
            "port": 587,
            "sender": "Cadence <cadence@example.com>",
        }))
        .unwrap();

        let EmailConfig::Smtp { sender, use_tls, .. } = config else {
            panic!("expected smtp config");
        };
        assert_eq!(sender.email.to_string(), "cadence@example.com");
        assert!(use_tls);
    }
}
