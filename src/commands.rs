pub mod migrate;
pub mod monitors;
pub mod serve;
pub mod version;
pub mod worker;
