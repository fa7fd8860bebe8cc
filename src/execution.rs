//! Per-firing state: the immutable [`ExecutionContext`] handed to workers and
//! the mutable [`ExecutionMetadata`] the host accumulates while a worker runs.

pub mod context;
pub mod metadata;
pub mod truncate;

use std::collections::BTreeMap;

pub use context::{
    generate_fire_instance_id, merge_data_maps, ExecutionContext, ExecutionContextBuilder,
    FireInfo,
};
pub use metadata::{ExceptionDetail, ExecutionMetadata, MetadataHandle};

/// String to string map used for job data, trigger data and job settings.
pub type DataMap = BTreeMap<String, String>;

/// Keys starting with this marker are reserved for the platform.
pub const SYSTEM_DATA_PREFIX: &str = "__";

#[must_use]
pub fn is_system_key(key: &str) -> bool {
    key.starts_with(SYSTEM_DATA_PREFIX)
}

/// Projection of a data map without the reserved system keys.
#[must_use]
pub fn user_data(data: &DataMap) -> DataMap {
    data.iter()
        .filter(|(key, _)| !is_system_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
