//! Ban validation limits and expiry scheduling.

use serde::Deserialize;

/// `[bans]` section.
///
/// These limits keep operators from placing bans so broad that they would
/// catch a large share of the network. The trusted service bypasses them.
#[derive(Debug, Clone, Deserialize)]
pub struct BanLimitsConfig {
    /// Minimum non-wildcard characters in a K-line or D-line mask (default: 4).
    #[serde(default = "default_min_nonwildcard")]
    pub min_nonwildcard: usize,
    /// Minimum non-wildcard characters in an X-line or RESV mask (default: 3).
    #[serde(default = "default_min_nonwildcard_simple")]
    pub min_nonwildcard_simple: usize,
    /// Shortest IPv4 prefix a K-line may use (default: 16).
    #[serde(default = "default_min_cidr")]
    pub kline_min_cidr: u8,
    /// Shortest IPv6 prefix a K-line may use (default: 48).
    #[serde(default = "default_min_cidr6")]
    pub kline_min_cidr6: u8,
    /// Shortest IPv4 prefix a D-line may use (default: 16).
    #[serde(default = "default_min_cidr")]
    pub dline_min_cidr: u8,
    /// Shortest IPv6 prefix a D-line may use (default: 48).
    #[serde(default = "default_min_cidr6")]
    pub dline_min_cidr6: u8,
    /// Seconds between expiry sweeps (default: 60).
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval: u64,
    /// Randomize each sweep within the last third of the interval.
    #[serde(default)]
    pub expiry_jitter: bool,
}

impl Default for BanLimitsConfig {
    fn default() -> Self {
        Self {
            min_nonwildcard: default_min_nonwildcard(),
            min_nonwildcard_simple: default_min_nonwildcard_simple(),
            kline_min_cidr: default_min_cidr(),
            kline_min_cidr6: default_min_cidr6(),
            dline_min_cidr: default_min_cidr(),
            dline_min_cidr6: default_min_cidr6(),
            expiry_interval: default_expiry_interval(),
            expiry_jitter: false,
        }
    }
}

fn default_min_nonwildcard() -> usize {
    4
}

fn default_min_nonwildcard_simple() -> usize {
    3
}

fn default_min_cidr() -> u8 {
    16
}

fn default_min_cidr6() -> u8 {
    48
}

fn default_expiry_interval() -> u64 {
    60
}
