//! Client authorization blocks.
//!
//! The first block whose `user` and `host` masks match a registering
//! client decides its ban exemptions.

use crate::security::{HostMask, UserContext, wildcard_match};
use serde::Deserialize;

/// Auth block configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthBlock {
    /// Username mask.
    #[serde(default = "default_any")]
    pub user: String,
    /// Hostname wildcard, address or CIDR block.
    #[serde(default = "default_any")]
    pub host: String,
    /// Exempt from K-lines and D-lines.
    #[serde(default)]
    pub kline_exempt: bool,
    /// Exempt from X-lines.
    #[serde(default)]
    pub xline_exempt: bool,
}

impl AuthBlock {
    /// Does this block cover `user`? A host that does not parse never
    /// matches; validation reports it.
    pub fn matches(&self, user: &UserContext<'_>) -> bool {
        wildcard_match(&self.user, user.username)
            && HostMask::parse(&self.host)
                .is_ok_and(|host| host.matches(user.hostname, user.sockhost, user.ip))
    }
}

fn default_any() -> String {
    "*".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user<'a>(username: &'a str, hostname: &'a str, ip: &'a str) -> UserContext<'a> {
        UserContext {
            username,
            hostname,
            sockhost: ip,
            ip: ip.parse().ok(),
            ..Default::default()
        }
    }

    #[test]
    fn auth_block_matches_host_or_network() {
        let block: AuthBlock =
            toml::from_str("host = \"*.staff.example\"\nkline_exempt = true").unwrap();
        assert_eq!(block.user, "*");
        assert!(!block.xline_exempt);
        assert!(block.matches(&user("alice", "box.staff.example", "192.0.2.1")));
        assert!(!block.matches(&user("alice", "box.example", "192.0.2.1")));

        let block: AuthBlock =
            toml::from_str("user = \"ops\"\nhost = \"198.51.100.0/24\"").unwrap();
        assert!(block.matches(&user("ops", "anything.example", "198.51.100.7")));
        assert!(!block.matches(&user("bob", "anything.example", "198.51.100.7")));
    }
}
