//! Silent, deterministic truncation of text bound for fixed-width columns.

/// Column limits, in characters.
pub mod limits {
    pub const JOB_ID: usize = 20;
    pub const JOB_NAME: usize = 50;
    pub const JOB_GROUP: usize = 50;
    pub const JOB_TYPE: usize = 50;
    pub const TRIGGER_ID: usize = 20;
    pub const TRIGGER_NAME: usize = 50;
    pub const TRIGGER_GROUP: usize = 50;
    pub const INSTANCE_ID: usize = 250;
    pub const SERVER_NAME: usize = 50;
    pub const DATA: usize = 4000;
}

/// Keeps the first `limit` characters of `value`.
#[must_use]
pub fn truncate(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}

#[must_use]
pub fn truncate_opt(value: Option<&str>, limit: usize) -> Option<String> {
    value.map(|value| truncate(value, limit))
}
