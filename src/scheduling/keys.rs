use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// Group used when a key is given without one.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Reserved group for internal platform jobs. Jobs in this group are exempt
/// from retry handling and monitor dispatch.
pub const SYSTEM_GROUP: &str = "__system";

/// Trigger group holding the one-shot triggers created after a failure.
pub const RETRY_TRIGGER_GROUP: &str = "__retry";

const ID_LENGTH: usize = 11;

/// Identifies a job definition inside the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.group == SYSTEM_GROUP
    }
}

impl Display for JobKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl FromStr for JobKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_key(s).map(|(group, name)| Self::new(group, name))
    }
}

/// Identifies a trigger inside the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub group: String,
    pub name: String,
}

impl TriggerKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl Display for TriggerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl FromStr for TriggerKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_key(s).map(|(group, name)| Self::new(group, name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid key '{0}': expected 'group.name' or 'name'")]
pub struct KeyParseError(pub String);

fn parse_key(s: &str) -> Result<(&str, &str), KeyParseError> {
    let trimmed = s.trim();
    let (group, name) = match trimmed.split_once('.') {
        Some((group, name)) => (group, name),
        None => (DEFAULT_GROUP, trimmed),
    };

    if group.is_empty() || name.is_empty() {
        return Err(KeyParseError(s.to_string()));
    }

    Ok((group, name))
}

/// Generates the short random id carried by jobs and triggers.
#[must_use]
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parsing_with_and_without_group() {
        let key: JobKey = "reports.daily".parse().unwrap();
        assert_eq!(key, JobKey::new("reports", "daily"));

        let key: JobKey = "daily".parse().unwrap();
        assert_eq!(key, JobKey::new(DEFAULT_GROUP, "daily"));

        assert!("reports.".parse::<JobKey>().is_err());
        assert!("".parse::<TriggerKey>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let key = TriggerKey::new("__retry", "retry.2.abc");
        let parsed: TriggerKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_generated_ids_have_fixed_length() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert_ne!(id, generate_id());
    }
}
