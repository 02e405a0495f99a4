//! Core configuration types.

use super::auth::AuthBlock;
use super::bans::{DlineBlock, KlineBlock, ResvBlock, XlineBlock};
use super::limits::BanLimitsConfig;
use super::links::{ClusterBlock, LinkBlock, ServiceBlock, SharedBlock};
use super::oper::OperBlock;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// Ban journal location.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Ban validation limits and expiry scheduling.
    #[serde(default)]
    pub bans: BanLimitsConfig,
    /// Operator blocks.
    #[serde(default)]
    pub oper: Vec<OperBlock>,
    /// Client authorization blocks.
    #[serde(default)]
    pub auth: Vec<AuthBlock>,
    /// Directly connected peers.
    #[serde(default)]
    pub link: Vec<LinkBlock>,
    /// Cluster blocks: where local bans are copied.
    #[serde(default)]
    pub cluster: Vec<ClusterBlock>,
    /// Shared blocks: who may place bans here.
    #[serde(default)]
    pub shared: Vec<SharedBlock>,
    /// Services servers.
    #[serde(default)]
    pub service: Vec<ServiceBlock>,
    #[serde(default)]
    pub kline: Vec<KlineBlock>,
    #[serde(default)]
    pub dline: Vec<DlineBlock>,
    #[serde(default)]
    pub xline: Vec<XlineBlock>,
    #[serde(default)]
    pub resv: Vec<ResvBlock>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "irc.straylight.net").
    pub name: String,
    /// Server ID (TS6 format, e.g., "001").
    pub sid: String,
    /// Server description.
    #[serde(default)]
    pub description: String,
}

/// Ban journal configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the MessagePack journal (default: "bans.msgpack").
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_journal_path(),
        }
    }
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("bans.msgpack")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r##"
[server]
name = "irc.example.net"
sid = "0AB"
description = "Test server"

[database]
path = "/var/lib/slircd/bans.msgpack"

[bans]
min_nonwildcard = 5
expiry_jitter = true

[[oper]]
name = "alice"
privileges = ["kline", "unkline", "dline"]

[[oper]]
name = "services"
service = true
privileges = ["kline", "unkline", "dline", "undline", "xline", "unxline", "resv", "unresv"]

[[link]]
name = "hub.example.net"
capabilities = ["KLN", "UNKLN", "DLN", "UNDLN", "CLUSTER"]
leaves = ["leaf.example.net"]

[[cluster]]
server = "*.example.net"
types = ["kline", "unkline"]

[[shared]]
server = "hub.example.net"
types = ["kline"]

[[service]]
name = "services.example.net"

[[kline]]
user = "*"
host = "*.evil.example"
reason = "Go away"

[[dline]]
address = "203.0.113.0/24"

[[xline]]
gecos = "*bot*"

[[resv]]
name = "#warez"
"##,
        )
        .unwrap();

        assert_eq!(config.server.name, "irc.example.net");
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/slircd/bans.msgpack")
        );
        assert_eq!(config.bans.min_nonwildcard, 5);
        assert!(config.bans.expiry_jitter);
        assert_eq!(config.oper.len(), 2);
        assert!(config.oper[1].service);
        assert_eq!(config.link[0].leaves, vec!["leaf.example.net"]);
        assert_eq!(config.cluster.len(), 1);
        assert_eq!(config.shared[0].user, "*");
        assert_eq!(config.service[0].name, "services.example.net");
        assert_eq!(config.kline[0].reason, "Go away");
        assert_eq!(config.dline[0].reason, "No reason");
    }

    #[test]
    fn default_journal_path_is_relative() {
        assert_eq!(DatabaseConfig::default().path, PathBuf::from("bans.msgpack"));
    }
}
