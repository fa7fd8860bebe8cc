use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::DataMap;

use super::{
    keys::{generate_id, JobKey, TriggerKey},
    SchedulerError,
};

/// What to do with a fire time that was missed by more than the
/// scheduler's misfire threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Fire once immediately, then continue with the regular schedule.
    #[default]
    FireNow,
    /// Drop the missed fire time and wait for the next one.
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSchedule {
    /// Six or seven field cron expression (seconds first).
    Cron(String),
    Interval {
        every: Duration,
        /// Number of repeats after the first firing, `None` for forever.
        repeat: Option<u32>,
    },
    Once,
}

impl TriggerSchedule {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Cron(expression) => cron::Schedule::from_str(expression)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Self::Interval { every, .. } if every.is_zero() => {
                Err("interval must be greater than zero".to_string())
            }
            Self::Interval { .. } | Self::Once => Ok(()),
        }
    }

    /// Computes the fire time following `previous`. `fired` is the number of
    /// firings already made by this trigger.
    pub fn next_fire_time(
        &self,
        start_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
        fired: u32,
    ) -> Result<Option<DateTime<Utc>>, String> {
        match self {
            Self::Once => Ok((fired == 0).then_some(start_at)),
            Self::Interval { every, repeat } => {
                if repeat.is_some_and(|repeat| fired > repeat) {
                    return Ok(None);
                }
                let Some(previous) = previous else {
                    return Ok(Some(start_at));
                };
                let every = chrono::Duration::from_std(*every).map_err(|e| e.to_string())?;
                Ok(Some(previous + every))
            }
            Self::Cron(expression) => {
                let schedule = cron::Schedule::from_str(expression).map_err(|e| e.to_string())?;
                let after = previous.map_or(start_at - chrono::Duration::seconds(1), |p| {
                    p.max(start_at - chrono::Duration::seconds(1))
                });
                Ok(schedule.after(&after).next())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub key: TriggerKey,
    pub id: String,
    pub job_key: JobKey,
    pub schedule: TriggerSchedule,
    pub start_at: DateTime<Utc>,
    pub data: DataMap,
    pub priority: i32,
    pub misfire: MisfirePolicy,
    /// Overrides the job's maximum run duration for firings of this trigger.
    pub timeout: Option<Duration>,
}

impl Trigger {
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: TriggerSchedule) -> Self {
        Self {
            key,
            id: generate_id(),
            job_key,
            schedule,
            start_at: Utc::now(),
            data: DataMap::new(),
            priority: 5,
            misfire: MisfirePolicy::default(),
            timeout: None,
        }
    }

    pub fn cron(key: TriggerKey, job_key: JobKey, expression: impl Into<String>) -> Self {
        Self::new(key, job_key, TriggerSchedule::Cron(expression.into()))
    }

    pub fn once(key: TriggerKey, job_key: JobKey, at: DateTime<Utc>) -> Self {
        let mut trigger = Self::new(key, job_key, TriggerSchedule::Once);
        trigger.start_at = at;
        trigger
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        self.schedule
            .validate()
            .map_err(|reason| SchedulerError::InvalidSchedule {
                trigger: self.key.clone(),
                reason,
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, minute, second)
            .unwrap()
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let schedule = TriggerSchedule::Once;
        let start = at(10, 0, 0);
        assert_eq!(schedule.next_fire_time(start, None, 0), Ok(Some(start)));
        assert_eq!(schedule.next_fire_time(start, Some(start), 1), Ok(None));
    }

    #[test]
    fn test_interval_respects_repeat_count() {
        let schedule = TriggerSchedule::Interval {
            every: Duration::from_secs(30),
            repeat: Some(1),
        };
        let start = at(10, 0, 0);
        assert_eq!(schedule.next_fire_time(start, None, 0), Ok(Some(start)));
        assert_eq!(
            schedule.next_fire_time(start, Some(start), 1),
            Ok(Some(at(10, 0, 30)))
        );
        assert_eq!(schedule.next_fire_time(start, Some(at(10, 0, 30)), 2), Ok(None));
    }

    #[test]
    fn test_cron_includes_start_second_and_moves_forward() {
        let schedule = TriggerSchedule::Cron("0 */15 * * * *".to_string());
        let start = at(10, 0, 0);
        assert_eq!(schedule.next_fire_time(start, None, 0), Ok(Some(start)));
        assert_eq!(
            schedule.next_fire_time(start, Some(start), 1),
            Ok(Some(at(10, 15, 0)))
        );
    }

    #[test]
    fn test_invalid_cron_is_rejected() {
        let trigger = Trigger::cron(
            TriggerKey::new("DEFAULT", "broken"),
            JobKey::new("DEFAULT", "job"),
            "not a cron",
        );
        assert!(matches!(
            trigger.validate(),
            Err(SchedulerError::InvalidSchedule { .. })
        ));
    }
}
