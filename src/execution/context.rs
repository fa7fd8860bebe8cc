use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::scheduling::{JobDetail, JobKey, Trigger, TriggerKey};

use super::{user_data, DataMap};

const FIRE_INSTANCE_SUFFIX_DIGITS: usize = 18;

/// Timing facts about one firing, supplied by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireInfo {
    pub fire_time: DateTime<Utc>,
    pub scheduled_fire_time: Option<DateTime<Utc>>,
    pub previous_fire_time: Option<DateTime<Utc>>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub refire_count: u32,
    pub recovering: bool,
}

impl FireInfo {
    #[must_use]
    pub fn now() -> Self {
        Self {
            fire_time: Utc::now(),
            scheduled_fire_time: None,
            previous_fire_time: None,
            next_fire_time: None,
            refire_count: 0,
            recovering: false,
        }
    }
}

/// Immutable snapshot of one firing. Serializable so that it can be handed to
/// a worker running in another process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    fire_instance_id: String,
    job_key: JobKey,
    job_id: String,
    trigger_key: TriggerKey,
    trigger_id: String,
    fire_time: DateTime<Utc>,
    scheduled_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    recovering: bool,
    refire_count: u32,
    merged_job_data_map: DataMap,
    job_settings: DataMap,
    environment: String,
}

impl ExecutionContext {
    #[must_use]
    pub fn fire_instance_id(&self) -> &str {
        &self.fire_instance_id
    }

    #[must_use]
    pub const fn job_key(&self) -> &JobKey {
        &self.job_key
    }

    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub const fn trigger_key(&self) -> &TriggerKey {
        &self.trigger_key
    }

    #[must_use]
    pub fn trigger_id(&self) -> &str {
        &self.trigger_id
    }

    #[must_use]
    pub const fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    #[must_use]
    pub const fn scheduled_fire_time(&self) -> Option<DateTime<Utc>> {
        self.scheduled_fire_time
    }

    #[must_use]
    pub const fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    #[must_use]
    pub const fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    #[must_use]
    pub const fn recovering(&self) -> bool {
        self.recovering
    }

    #[must_use]
    pub const fn refire_count(&self) -> u32 {
        self.refire_count
    }

    #[must_use]
    pub const fn merged_job_data_map(&self) -> &DataMap {
        &self.merged_job_data_map
    }

    /// The merged data map without reserved system keys.
    #[must_use]
    pub fn user_data(&self) -> DataMap {
        user_data(&self.merged_job_data_map)
    }

    #[must_use]
    pub fn data(&self, key: &str) -> Option<&str> {
        self.merged_job_data_map.get(key).map(String::as_str)
    }

    #[must_use]
    pub const fn job_settings(&self) -> &DataMap {
        &self.job_settings
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }
}

/// Job data overlaid by trigger data. Trigger values win on key collision and
/// keys are compared case-sensitively.
#[must_use]
pub fn merge_data_maps(job_data: &DataMap, trigger_data: &DataMap) -> DataMap {
    let mut merged = job_data.clone();
    for (key, value) in trigger_data {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// `{instance_id}{18 random digits}`. Collisions are not checked.
#[must_use]
pub fn generate_fire_instance_id(instance_id: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(instance_id.len() + FIRE_INSTANCE_SUFFIX_DIGITS);
    id.push_str(instance_id);
    for _ in 0..FIRE_INSTANCE_SUFFIX_DIGITS {
        id.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    id
}

/// Builds the [`ExecutionContext`] for each firing of this host.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContextBuilder {
    instance_id: String,
    environment: String,
    global_settings: DataMap,
    job_settings: HashMap<String, DataMap>,
}

impl ExecutionContextBuilder {
    pub fn new(instance_id: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            environment: environment.into(),
            global_settings: DataMap::new(),
            job_settings: HashMap::new(),
        }
    }

    /// Settings visible to every job. Per job-type settings win over these.
    #[must_use]
    pub fn with_global_settings(mut self, settings: DataMap) -> Self {
        self.global_settings = settings;
        self
    }

    #[must_use]
    pub fn with_job_settings(mut self, job_type: impl Into<String>, settings: DataMap) -> Self {
        self.job_settings.insert(job_type.into(), settings);
        self
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn build(&self, job: &JobDetail, trigger: &Trigger, fire: FireInfo) -> ExecutionContext {
        let mut settings = self.global_settings.clone();
        if let Some(specific) = self.job_settings.get(job.kind.type_name()) {
            settings.extend(specific.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        ExecutionContext {
            fire_instance_id: generate_fire_instance_id(&self.instance_id),
            job_key: job.key.clone(),
            job_id: job.id.clone(),
            trigger_key: trigger.key.clone(),
            trigger_id: trigger.id.clone(),
            fire_time: fire.fire_time,
            scheduled_fire_time: fire.scheduled_fire_time,
            previous_fire_time: fire.previous_fire_time,
            next_fire_time: fire.next_fire_time,
            recovering: fire.recovering,
            refire_count: fire.refire_count,
            merged_job_data_map: merge_data_maps(&job.data, &trigger.data),
            job_settings: settings,
            environment: self.environment.clone(),
        }
    }
}
