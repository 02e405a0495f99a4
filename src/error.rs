//! Unified error handling for slircd-bans.
//!
//! Ban commands fail with a [`BanError`]. Validation and permission
//! failures are reported only to the issuing operator and are never
//! forwarded to a peer. Persistence failures are logged by the store and
//! do not roll back an in-memory change.

use crate::security::BanId;
use thiserror::Error;

// ============================================================================
// Ban command errors
// ============================================================================

/// Errors returned by ban store operations and ban command handlers.
#[derive(Debug, Error)]
pub enum BanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("{pattern} is already banned ({existing})")]
    Duplicate { existing: BanId, pattern: String },

    #[error("no ban found for {0}")]
    NotFound(String),
}

impl BanError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::Permission(e) => e.error_code(),
            Self::Duplicate { .. } => "duplicate_ban",
            Self::NotFound(_) => "ban_not_found",
        }
    }
}

// ============================================================================
// Validation errors (malformed or over-broad masks)
// ============================================================================

/// A ban command was rejected before any state changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("wrong number of arguments")]
    BadArgumentCount,

    #[error("empty mask")]
    EmptyMask,

    #[error("malformed mask: {0}")]
    MalformedMask(String),

    #[error("a reason is required")]
    EmptyReason,

    #[error("no such nick: {0}")]
    NoSuchNick(String),

    #[error("{mask} is too broad: at least {required} non-wildcard characters are required")]
    TooFewNonWildcard { mask: String, required: usize },

    #[error("{mask} is too wide: the minimum CIDR prefix is /{required}")]
    CidrTooWide { mask: String, required: u8 },

    #[error("{0} is not an IP address or CIDR block")]
    NotAnAddress(String),

    #[error("{0} is exempt from bans")]
    Exempt(String),
}

impl ValidationError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadArgumentCount => "bad_argument_count",
            Self::EmptyMask => "empty_mask",
            Self::MalformedMask(_) => "malformed_mask",
            Self::EmptyReason => "empty_reason",
            Self::NoSuchNick(_) => "no_such_nick",
            Self::TooFewNonWildcard { .. } => "too_few_non_wildcard",
            Self::CidrTooWide { .. } => "cidr_too_wide",
            Self::NotAnAddress(_) => "not_an_address",
            Self::Exempt(_) => "exempt",
        }
    }
}

// ============================================================================
// Permission errors
// ============================================================================

/// The issuer is not allowed to perform the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("insufficient privileges for {0}")]
    NoPrivilege(&'static str),

    #[error("{0} was added from configuration and cannot be removed")]
    NotPersisted(String),

    #[error("{user}@{host} on {server} is not authorized to set bans here")]
    Untrusted {
        server: String,
        user: String,
        host: String,
    },
}

impl PermissionError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoPrivilege(_) => "no_privilege",
            Self::NotPersisted(_) => "not_persisted",
            Self::Untrusted { .. } => "untrusted_origin",
        }
    }
}

// ============================================================================
// Persistence errors
// ============================================================================

/// Failures reading or writing the ban journal.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("journal decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("unsupported journal version {0}")]
    Version(u32),
}
