//! Operator block configuration.

use crate::sync::capab::CommandSet;
use serde::Deserialize;

/// Operator block configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OperBlock {
    /// Operator name, as shown in ban notices.
    pub name: String,
    /// Username the operator connects with.
    #[serde(default = "default_user")]
    pub user: String,
    /// Host the operator connects from.
    #[serde(default = "default_host")]
    pub host: String,
    /// Ban commands this operator may issue.
    #[serde(default)]
    pub privileges: CommandSet,
    /// The trusted service identity: bypasses shared-block checks and
    /// mask limits.
    #[serde(default)]
    pub service: bool,
}

fn default_user() -> String {
    "oper".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::capab::BanCommand;

    #[test]
    fn privileges_parse_from_names() {
        let block: OperBlock =
            toml::from_str("name = \"alice\"\nprivileges = [\"kline\", \"unkline\"]").unwrap();
        assert!(block.privileges.contains(BanCommand::Kline));
        assert!(!block.privileges.contains(BanCommand::Dline));
        assert!(!block.service);
        assert_eq!(block.host, "localhost");
    }
}
