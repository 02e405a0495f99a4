//! Static bans defined in the configuration file.
//!
//! These are loaded at startup and on every rehash. They are never written
//! to the ban journal and cannot be removed by UNKLINE and friends.

use crate::error::ValidationError;
use crate::security::{BanPattern, BanRecord, Timestamp};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct KlineBlock {
    #[serde(default = "default_any")]
    pub user: String,
    pub host: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DlineBlock {
    pub address: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XlineBlock {
    pub gecos: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResvBlock {
    /// Nickname or channel mask.
    pub name: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_any() -> String {
    "*".to_string()
}

fn default_reason() -> String {
    "No reason".to_string()
}

/// Build records for every configured ban.
pub fn static_records(
    config: &super::Config,
    now: Timestamp,
) -> Result<Vec<BanRecord>, ValidationError> {
    let mut records = Vec::new();
    for block in &config.kline {
        let pattern = BanPattern::kline(&block.user, &block.host)?;
        records.push(BanRecord::from_config(pattern, &block.reason, now));
    }
    for block in &config.dline {
        let pattern = BanPattern::dline(&block.address)?;
        records.push(BanRecord::from_config(pattern, &block.reason, now));
    }
    for block in &config.xline {
        let pattern = BanPattern::xline(&block.gecos)?;
        records.push(BanRecord::from_config(pattern, &block.reason, now));
    }
    for block in &config.resv {
        let pattern = BanPattern::resv(&block.name)?;
        records.push(BanRecord::from_config(pattern, &block.reason, now));
    }
    Ok(records)
}
