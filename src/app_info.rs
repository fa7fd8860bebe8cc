/// Identifies a binary crate (app) and its version metadata.
///
/// Applications embedding `cadence` pass their own so `version` reports the
/// concrete binary alongside the core it runs on.
#[derive(Clone, Copy, Debug)]
pub struct AppInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

impl AppInfo {
    #[must_use]
    pub const fn new(name: &'static str, version: &'static str, description: &'static str) -> Self {
        Self {
            name,
            version,
            description,
        }
    }

    /// The orchestration core itself.
    #[must_use]
    pub const fn core() -> Self {
        Self::new(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_DESCRIPTION"),
        )
    }
}
