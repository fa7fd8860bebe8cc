//! Retry state machine. The whole retry state lives in trigger data: a span
//! (`__retry_span`) arms it and a counter (`__retry_counter`) tracks the
//! attempt. A failed firing of an armed trigger schedules one one-shot
//! trigger in the `__retry` group, carrying both keys forward, until the
//! counter exceeds the configured maximum.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    execution::ExecutionContext,
    jobs::job_result::FiringReport,
    monitor::{MonitorEngine, MonitorEvent, MonitorEventInfo},
    scheduling::{generate_id, Scheduler, Trigger, TriggerKey, TriggerListener, RETRY_TRIGGER_GROUP},
};

pub const RETRY_COUNTER_KEY: &str = "__retry_counter";
pub const RETRY_SPAN_KEY: &str = "__retry_span";

/// Span as stored in trigger data: whole seconds.
#[must_use]
pub fn format_span(span: Duration) -> String {
    span.as_secs().to_string()
}

/// Reads a span written as whole seconds or as `hh:mm:ss`.
#[must_use]
pub fn parse_span(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let parts: Vec<u64> = raw
        .split(':')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => {
            Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
        }
        _ => None,
    }
}

fn retry_counter(trigger: &Trigger) -> u32 {
    match trigger.data.get(RETRY_COUNTER_KEY) {
        None => 0,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(
                "⚠️ Trigger {} has unreadable retry counter '{}', restarting from 0",
                trigger.key, raw
            );
            0
        }),
    }
}

/// The one-shot trigger re-firing the job of `trigger` after `span`.
fn retry_trigger(trigger: &Trigger, counter: u32, span: Duration) -> Trigger {
    let id = if trigger.id.is_empty() {
        generate_id()
    } else {
        trigger.id.clone()
    };
    let start_at = Utc::now()
        + chrono::Duration::from_std(span).unwrap_or_else(|_| chrono::Duration::seconds(0));

    let mut retry = Trigger::once(
        TriggerKey::new(RETRY_TRIGGER_GROUP, format!("retry.{counter}.{id}")),
        trigger.job_key.clone(),
        start_at,
    );
    retry.data = trigger.data.clone();
    retry.data.insert(RETRY_COUNTER_KEY.to_string(), counter.to_string());
    retry.data.insert(RETRY_SPAN_KEY.to_string(), format_span(span));
    retry.priority = trigger.priority;
    retry.misfire = trigger.misfire;
    retry.timeout = trigger.timeout;
    retry
}

pub struct RetryTriggerListener {
    max_retries: u32,
    monitors: MonitorEngine,
}

impl RetryTriggerListener {
    #[must_use]
    pub const fn new(max_retries: u32, monitors: MonitorEngine) -> Self {
        Self {
            max_retries,
            monitors,
        }
    }
}

#[async_trait]
impl TriggerListener for RetryTriggerListener {
    fn name(&self) -> &str {
        "retry"
    }

    async fn trigger_fired(&self, trigger: &mut Trigger) {
        if !trigger.data.contains_key(RETRY_SPAN_KEY) {
            return;
        }

        let counter = retry_counter(trigger).saturating_add(1);
        trigger
            .data
            .insert(RETRY_COUNTER_KEY.to_string(), counter.to_string());
        debug!("🔁 Trigger {} attempt {}", trigger.key, counter);
    }

    async fn trigger_complete(
        &self,
        scheduler: &dyn Scheduler,
        trigger: &Trigger,
        context: &ExecutionContext,
        report: &FiringReport,
    ) {
        if !report.failed() || trigger.job_key.is_system() {
            return;
        }

        let Some(raw_span) = trigger.data.get(RETRY_SPAN_KEY) else {
            return;
        };
        let Some(span) = parse_span(raw_span) else {
            warn!(
                "⚠️ Trigger {} has unreadable retry span '{}', not retrying",
                trigger.key, raw_span
            );
            return;
        };

        let counter = retry_counter(trigger);
        let info = MonitorEventInfo::from_context(context)
            .with_exception_text(report.exceptions_text())
            .with_duration(report.duration);

        if counter > self.max_retries {
            warn!(
                "🛑 Job {} failed after {} retries, giving up",
                trigger.job_key, self.max_retries
            );
            self.monitors
                .dispatch(MonitorEvent::ExecutionLastRetryFail, &info)
                .await;
            return;
        }

        let retry = retry_trigger(trigger, counter, span);
        let retry_key = retry.key.clone();
        let start_at = retry.start_at;

        match scheduler.schedule_trigger(retry).await {
            Ok(()) => {
                info!(
                    "🔁 Job {} failed, retry #{} scheduled as {} at {}",
                    trigger.job_key,
                    counter,
                    retry_key,
                    start_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                self.monitors
                    .dispatch(MonitorEvent::ExecutionRetry, &info)
                    .await;
            }
            Err(e) => error!(
                "❌ Failed to schedule retry of job {}: {}",
                trigger.job_key, e
            ),
        }
    }
}
