//! Configuration validation.
//!
//! Validates configuration at startup and on rehash to catch errors before
//! any ban state changes. Unknown privilege, capability and type names are
//! already rejected while parsing.

use super::Config;
use crate::security::{BanPattern, HostMask, wildcard_match};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("server.sid must be exactly 3 characters, got {0}")]
    InvalidSid(usize),
    #[error("server.sid must match pattern [0-9][A-Z0-9][A-Z0-9], got '{0}'")]
    InvalidSidFormat(String),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("link '{0}' is defined more than once")]
    DuplicateLink(String),
    #[error("link name '{0}' matches this server")]
    LinkToSelf(String),
    #[error("bans.expiry_interval must be at least 1 second")]
    ZeroExpiryInterval,
    #[error("auth host '{host}' is invalid: {source}")]
    InvalidAuthHost {
        host: String,
        source: crate::error::ValidationError,
    },
    #[error("configured {kind} '{mask}' is invalid: {source}")]
    InvalidStaticBan {
        kind: &'static str,
        mask: String,
        source: crate::error::ValidationError,
    },
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    // SID validation (TS6 format)
    let sid = &config.server.sid;
    if sid.len() != 3 {
        errors.push(ValidationError::InvalidSid(sid.len()));
    } else {
        let chars: Vec<char> = sid.chars().collect();
        let valid = chars[0].is_ascii_digit()
            && (chars[1].is_ascii_uppercase() || chars[1].is_ascii_digit())
            && (chars[2].is_ascii_uppercase() || chars[2].is_ascii_digit());
        if !valid {
            errors.push(ValidationError::InvalidSidFormat(sid.clone()));
        }
    }

    let journal = Path::new(&config.database.path);
    if let Some(parent) = journal.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.display().to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for link in &config.link {
        if !seen.insert(link.name.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateLink(link.name.clone()));
        }
        if wildcard_match(&link.name, &config.server.name) {
            errors.push(ValidationError::LinkToSelf(link.name.clone()));
        }
    }

    if config.bans.expiry_interval == 0 {
        errors.push(ValidationError::ZeroExpiryInterval);
    }

    for block in &config.auth {
        if let Err(source) = HostMask::parse(&block.host) {
            errors.push(ValidationError::InvalidAuthHost {
                host: block.host.clone(),
                source,
            });
        }
    }

    let mut check = |kind: &'static str, mask: String, result: Result<BanPattern, _>| {
        if let Err(source) = result {
            errors.push(ValidationError::InvalidStaticBan { kind, mask, source });
        }
    };
    for block in &config.kline {
        check(
            "kline",
            format!("{}@{}", block.user, block.host),
            BanPattern::kline(&block.user, &block.host),
        );
    }
    for block in &config.dline {
        check("dline", block.address.clone(), BanPattern::dline(&block.address));
    }
    for block in &config.xline {
        check("xline", block.gecos.clone(), BanPattern::xline(&block.gecos));
    }
    for block in &config.resv {
        check("resv", block.name.clone(), BanPattern::resv(&block.name));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
