use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of one job instance log row.
///
/// A row is created as `Running` when the host initializes a firing and is
/// moved to `Success` or `Fail` when the firing is finalized. Cancelled and
/// timed out firings are stored as `Fail`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceStatus {
    #[sea_orm(string_value = "running")]
    #[default]
    Running,

    #[sea_orm(string_value = "success")]
    Success,

    #[sea_orm(string_value = "fail")]
    Fail,
}

impl InstanceStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }
}
