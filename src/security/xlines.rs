//! Ban records: K-lines, D-lines, X-lines and reservations.
//!
//! | Kind       | Pattern          | Matched against                 |
//! |------------|------------------|---------------------------------|
//! | K-line     | `user@host`      | username and host / address     |
//! | D-line     | IP or CIDR block | connecting address              |
//! | X-line     | realname mask    | realname (gecos)                |
//! | RESV       | nick or channel  | requested nickname / channel    |
//!
//! A record is immutable once created. Its [`BanId`] is assigned by the
//! store from a monotonic counter, so a larger id is a more recent ban.

use super::hostmask::{HostMask, normalize_ip, wildcard_match};
use crate::error::ValidationError;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Longest reason kept on a record; longer reasons are truncated.
pub const REASON_LEN: usize = 180;

/// Stable handle of a stored ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BanId(pub(crate) u64);

impl BanId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of a ban record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BanKind {
    Kline,
    Dline,
    Xline,
    ResvChannel,
    ResvNick,
}

impl BanKind {
    pub const ALL: [BanKind; 5] = [
        BanKind::Kline,
        BanKind::Dline,
        BanKind::Xline,
        BanKind::ResvChannel,
        BanKind::ResvNick,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            BanKind::Kline => 0,
            BanKind::Dline => 1,
            BanKind::Xline => 2,
            BanKind::ResvChannel => 3,
            BanKind::ResvNick => 4,
        }
    }

    /// Human-readable name for logs and notices.
    pub fn name(self) -> &'static str {
        match self {
            BanKind::Kline => "K-line",
            BanKind::Dline => "D-line",
            BanKind::Xline => "X-line",
            BanKind::ResvChannel | BanKind::ResvNick => "RESV",
        }
    }

    /// K-lines and D-lines live in the address index.
    pub fn is_address_based(self) -> bool {
        matches!(self, BanKind::Kline | BanKind::Dline)
    }

    /// Kinds whose addition disconnects matching clients.
    pub fn is_enforced(self) -> bool {
        matches!(self, BanKind::Kline | BanKind::Dline | BanKind::Xline)
    }
}

/// Identity of a connection as seen by ban matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserContext<'a> {
    /// Current (or requested) nickname.
    pub nickname: &'a str,
    /// Username (ident).
    pub username: &'a str,
    /// Resolved hostname.
    pub hostname: &'a str,
    /// Textual form of the connecting address.
    pub sockhost: &'a str,
    /// Connecting address.
    pub ip: Option<IpAddr>,
    /// Realname (gecos).
    pub realname: &'a str,
}

impl<'a> UserContext<'a> {
    /// Context holding only an address, as known when a socket is accepted.
    pub fn for_address(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Default::default()
        }
    }
}

/// Common behavior of every ban pattern.
pub trait BanMatch {
    /// Does this pattern match the given client identity?
    fn matches(&self, user: &UserContext<'_>) -> bool;

    /// Display form, as shown in STATS and notices.
    fn describe(&self) -> String;

    /// Normalized form used for duplicate detection.
    fn normalized(&self) -> String;
}

/// `user@host` ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kline {
    pub user: String,
    pub host: HostMask,
}

impl BanMatch for Kline {
    fn matches(&self, user: &UserContext<'_>) -> bool {
        wildcard_match(&self.user, user.username)
            && self.host.matches(user.hostname, user.sockhost, user.ip)
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn normalized(&self) -> String {
        format!("{}@{}", self.user.to_ascii_lowercase(), self.host.normalized())
    }
}

/// Address ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dline {
    pub net: IpNet,
}

impl BanMatch for Dline {
    fn matches(&self, user: &UserContext<'_>) -> bool {
        user.ip
            .is_some_and(|ip| super::hostmask::cidr_contains(&self.net, normalize_ip(ip)))
    }

    fn describe(&self) -> String {
        HostMask::Cidr(self.net).to_string()
    }

    fn normalized(&self) -> String {
        self.describe()
    }
}

/// Realname ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xline {
    pub gecos: String,
}

impl BanMatch for Xline {
    fn matches(&self, user: &UserContext<'_>) -> bool {
        wildcard_match(&self.gecos, user.realname)
    }

    fn describe(&self) -> String {
        self.gecos.clone()
    }

    fn normalized(&self) -> String {
        self.gecos.to_ascii_lowercase()
    }
}

/// Nickname or channel reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resv {
    pub name: String,
}

impl Resv {
    pub fn matches_name(&self, name: &str) -> bool {
        wildcard_match(&self.name, name)
    }
}

/// Is this a channel name (as opposed to a nickname)?
pub fn is_channel_name(name: &str) -> bool {
    name.starts_with('#') || name.starts_with('&')
}

/// A ban pattern of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanPattern {
    Kline(Kline),
    Dline(Dline),
    Xline(Xline),
    ResvChannel(Resv),
    ResvNick(Resv),
}

impl BanPattern {
    /// Parse a `user` / `host` pair into a K-line pattern.
    pub fn kline(user: &str, host: &str) -> Result<Self, ValidationError> {
        let user = if user.is_empty() { "*" } else { user };
        if user.chars().any(|c| c.is_whitespace() || c.is_control() || c == '@') {
            return Err(ValidationError::MalformedMask(user.to_string()));
        }
        Ok(BanPattern::Kline(Kline {
            user: user.to_string(),
            host: HostMask::parse(host)?,
        }))
    }

    /// Parse an IP address or CIDR block into a D-line pattern.
    pub fn dline(address: &str) -> Result<Self, ValidationError> {
        match HostMask::parse(address)? {
            HostMask::Cidr(net) => Ok(BanPattern::Dline(Dline { net })),
            HostMask::Wildcard(_) => Err(ValidationError::NotAnAddress(address.to_string())),
        }
    }

    pub fn xline(gecos: &str) -> Result<Self, ValidationError> {
        if gecos.is_empty() {
            return Err(ValidationError::EmptyMask);
        }
        Ok(BanPattern::Xline(Xline {
            gecos: gecos.to_string(),
        }))
    }

    /// Parse a reservation; names starting with `#` or `&` reserve channels.
    pub fn resv(name: &str) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyMask);
        }
        if name.chars().any(|c| c.is_whitespace() || c == ',') {
            return Err(ValidationError::MalformedMask(name.to_string()));
        }
        let resv = Resv {
            name: name.to_string(),
        };
        Ok(if is_channel_name(name) {
            BanPattern::ResvChannel(resv)
        } else {
            BanPattern::ResvNick(resv)
        })
    }

    /// Rebuild a pattern from the fields produced by [`BanPattern::fields`].
    pub fn from_fields(kind: BanKind, fields: &[String]) -> Result<Self, ValidationError> {
        match (kind, fields) {
            (BanKind::Kline, [user, host]) => Self::kline(user, host),
            (BanKind::Dline, [address]) => Self::dline(address),
            (BanKind::Xline, [gecos]) => Self::xline(gecos),
            (BanKind::ResvChannel | BanKind::ResvNick, [name]) => Self::resv(name),
            _ => Err(ValidationError::BadArgumentCount),
        }
    }

    /// The mask fields of this pattern, in their display form.
    pub fn fields(&self) -> Vec<String> {
        match self {
            BanPattern::Kline(k) => vec![k.user.clone(), k.host.to_string()],
            BanPattern::Dline(d) => vec![d.describe()],
            BanPattern::Xline(x) => vec![x.gecos.clone()],
            BanPattern::ResvChannel(r) | BanPattern::ResvNick(r) => vec![r.name.clone()],
        }
    }

    pub fn kind(&self) -> BanKind {
        match self {
            BanPattern::Kline(_) => BanKind::Kline,
            BanPattern::Dline(_) => BanKind::Dline,
            BanPattern::Xline(_) => BanKind::Xline,
            BanPattern::ResvChannel(_) => BanKind::ResvChannel,
            BanPattern::ResvNick(_) => BanKind::ResvNick,
        }
    }

    /// The address-side mask of a K-line or D-line.
    pub fn host_mask(&self) -> Option<HostMask> {
        match self {
            BanPattern::Kline(k) => Some(k.host.clone()),
            BanPattern::Dline(d) => Some(HostMask::Cidr(d.net)),
            _ => None,
        }
    }
}

impl BanMatch for BanPattern {
    fn matches(&self, user: &UserContext<'_>) -> bool {
        match self {
            BanPattern::Kline(k) => k.matches(user),
            BanPattern::Dline(d) => d.matches(user),
            BanPattern::Xline(x) => x.matches(user),
            BanPattern::ResvNick(r) => r.matches_name(user.nickname),
            // Channel reservations never match a connection
            BanPattern::ResvChannel(_) => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            BanPattern::Kline(k) => k.describe(),
            BanPattern::Dline(d) => d.describe(),
            BanPattern::Xline(x) => x.describe(),
            BanPattern::ResvChannel(r) | BanPattern::ResvNick(r) => r.name.clone(),
        }
    }

    fn normalized(&self) -> String {
        match self {
            BanPattern::Kline(k) => k.normalized(),
            BanPattern::Dline(d) => d.normalized(),
            BanPattern::Xline(x) => x.normalized(),
            BanPattern::ResvChannel(r) | BanPattern::ResvNick(r) => r.name.to_ascii_lowercase(),
        }
    }
}

/// A ban as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub pattern: BanPattern,
    /// Reason text, stored unformatted.
    pub reason: String,
    pub created_at: Timestamp,
    /// `None` for a permanent ban.
    pub expires_at: Option<Timestamp>,
    /// `false` for bans that come from static configuration.
    pub persisted: bool,
}

impl BanRecord {
    /// Create a record. A `duration` of zero seconds makes the ban permanent.
    pub fn new(pattern: BanPattern, reason: &str, created_at: Timestamp, duration: u64) -> Self {
        let expires_at = (duration > 0)
            .then(|| created_at.saturating_add(i64::try_from(duration).unwrap_or(i64::MAX)));
        Self {
            pattern,
            reason: truncate_reason(reason),
            created_at,
            expires_at,
            persisted: true,
        }
    }

    /// Create a configuration-defined (non-persisted, permanent) record.
    pub fn from_config(pattern: BanPattern, reason: &str, created_at: Timestamp) -> Self {
        Self {
            persisted: false,
            ..Self::new(pattern, reason, created_at, 0)
        }
    }

    pub fn kind(&self) -> BanKind {
        self.pattern.kind()
    }

    pub fn is_temporary(&self) -> bool {
        self.expires_at.is_some()
    }

    /// Runtime-added, journaled and removable online.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// True once `now` has reached the expiry time of a temporary ban.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Remaining lifetime in seconds, `None` if permanent.
    pub fn remaining(&self, now: Timestamp) -> Option<i64> {
        self.expires_at.map(|at| (at - now).max(0))
    }
}

impl BanMatch for BanRecord {
    fn matches(&self, user: &UserContext<'_>) -> bool {
        self.pattern.matches(user)
    }

    fn describe(&self) -> String {
        self.pattern.describe()
    }

    fn normalized(&self) -> String {
        self.pattern.normalized()
    }
}

/// Truncate a reason to [`REASON_LEN`] characters.
pub fn truncate_reason(reason: &str) -> String {
    match reason.char_indices().nth(REASON_LEN) {
        Some((idx, _)) => reason[..idx].to_string(),
        None => reason.to_string(),
    }
}
