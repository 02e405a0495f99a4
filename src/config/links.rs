//! Server-to-server ban sharing configuration.

use crate::sync::capab::{CapabilitySet, CommandSet};
use serde::Deserialize;

/// A directly connected peer.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name (e.g., "hub.straylight.net").
    pub name: String,
    /// Capabilities the peer negotiated (`KLN`, `UNKLN`, `DLN`, `UNDLN`, `CLUSTER`).
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Servers introduced behind this peer.
    #[serde(default)]
    pub leaves: Vec<String>,
}

/// Servers that receive a copy of every local ban of the listed types.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterBlock {
    /// Server name mask.
    pub server: String,
    #[serde(default = "CommandSet::all")]
    pub types: CommandSet,
}

/// Remote origins allowed to place bans of the listed types here.
#[derive(Debug, Clone, Deserialize)]
pub struct SharedBlock {
    /// Originating server mask.
    #[serde(default = "default_any")]
    pub server: String,
    /// Issuing operator's username mask.
    #[serde(default = "default_any")]
    pub user: String,
    /// Issuing operator's host mask.
    #[serde(default = "default_any")]
    pub host: String,
    #[serde(default = "CommandSet::all")]
    pub types: CommandSet,
}

/// A services server. Bans issued from it bypass mask limits and shared
/// block checks.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceBlock {
    pub name: String,
}

fn default_any() -> String {
    "*".to_string()
}
