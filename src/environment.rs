use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    /// Base name of the configuration file, without extension.
    #[must_use]
    pub fn config_file(self) -> String {
        format!("config/{self}")
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn test_environment_names_select_config_files() {
        assert_eq!(Environment::from_str("production"), Ok(Environment::Production));
        assert!(Environment::from_str("staging").is_err());
        assert_eq!(Environment::Test.config_file(), "config/test");
        assert_eq!(Environment::default().to_string(), "development");
    }
}
