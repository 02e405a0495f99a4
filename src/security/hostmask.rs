//! Host and address mask parsing and matching.
//!
//! A ban mask is either a literal address / CIDR block or a hostname
//! wildcard pattern. Wildcards are `*` (any run of characters) and `?`
//! (exactly one character); `\` escapes the next character. Comparison is
//! ASCII case-insensitive.
//!
//! | Mask text          | Parsed as                 |
//! |--------------------|---------------------------|
//! | `192.0.2.17`       | `Cidr(192.0.2.17/32)`     |
//! | `192.0.2.17/24`    | `Cidr(192.0.2.0/24)`      |
//! | `192.0.2.*`        | `Cidr(192.0.2.0/24)`      |
//! | `2001:db8::/32`    | `Cidr(2001:db8::/32)`     |
//! | `*.example.net`    | `Wildcard("*.example.net")` |

use crate::error::ValidationError;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Characters that never count towards the non-wildcard minimum of a
/// user@host or address mask.
const KWILD_CHARS: &[char] = &['*', '?', '.', '@', '!'];

/// Address family of a CIDR mask or candidate address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A parsed host or address mask.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostMask {
    /// Literal address or CIDR block, stored as its canonical network.
    Cidr(IpNet),
    /// Hostname wildcard pattern, stored lowercased.
    Wildcard(String),
}

impl HostMask {
    /// Parse mask text.
    ///
    /// Anything that is not a literal address, `address/prefix`, or a
    /// dotted-quad with trailing `*` octets is treated as a hostname
    /// wildcard. Empty text, whitespace, and an address with an
    /// out-of-range prefix are rejected.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        if text.is_empty() {
            return Err(ValidationError::EmptyMask);
        }
        if text.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::MalformedMask(text.to_string()));
        }

        if let Some((addr, bits)) = text.split_once('/')
            && let Ok(addr) = addr.parse::<IpAddr>()
        {
            let bits: u8 = bits
                .parse()
                .map_err(|_| ValidationError::MalformedMask(text.to_string()))?;
            return cidr(addr, bits)
                .map(HostMask::Cidr)
                .ok_or_else(|| ValidationError::MalformedMask(text.to_string()));
        }

        if let Ok(addr) = text.parse::<IpAddr>() {
            let bits = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            return cidr(addr, bits)
                .map(HostMask::Cidr)
                .ok_or_else(|| ValidationError::MalformedMask(text.to_string()));
        }

        if let Some(net) = parse_octet_wildcard(text) {
            return Ok(HostMask::Cidr(IpNet::V4(net)));
        }

        Ok(HostMask::Wildcard(text.to_ascii_lowercase()))
    }

    /// Address family, or `None` for a hostname wildcard.
    pub fn family(&self) -> Option<AddressFamily> {
        match self {
            HostMask::Cidr(IpNet::V4(_)) => Some(AddressFamily::V4),
            HostMask::Cidr(IpNet::V6(_)) => Some(AddressFamily::V6),
            HostMask::Wildcard(_) => None,
        }
    }

    /// CIDR prefix length, or `None` for a hostname wildcard.
    pub fn prefix_len(&self) -> Option<u8> {
        match self {
            HostMask::Cidr(net) => Some(net.prefix_len()),
            HostMask::Wildcard(_) => None,
        }
    }

    /// Match against a client's resolved hostname, its textual address and
    /// its parsed address.
    ///
    /// CIDR masks compare the leading `prefix_len` bits of the address;
    /// wildcard masks are tried against both the hostname and the textual
    /// address so a hostmask ban also catches a client on a raw IP.
    pub fn matches(&self, host: &str, sockhost: &str, ip: Option<IpAddr>) -> bool {
        match self {
            HostMask::Cidr(net) => {
                let ip = ip.or_else(|| sockhost.parse().ok());
                ip.is_some_and(|ip| cidr_contains(net, ip))
            }
            HostMask::Wildcard(pattern) => {
                wildcard_match(pattern, host)
                    || (!sockhost.is_empty() && wildcard_match(pattern, sockhost))
            }
        }
    }

    /// Normalized form used for duplicate detection.
    pub fn normalized(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HostMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostMask::Cidr(net) if net.prefix_len() == net.max_prefix_len() => {
                write!(f, "{}", net.addr())
            }
            HostMask::Cidr(net) => write!(f, "{net}"),
            HostMask::Wildcard(pattern) => f.write_str(pattern),
        }
    }
}

/// Build the canonical network for `addr/bits`, folding IPv4-mapped IPv6
/// masks into IPv4.
fn cidr(addr: IpAddr, bits: u8) -> Option<IpNet> {
    match addr {
        IpAddr::V4(v4) => Ipv4Net::new(v4, bits).ok().map(|n| IpNet::V4(n.trunc())),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped()
                && bits >= 96
            {
                return Ipv4Net::new(v4, bits - 96)
                    .ok()
                    .map(|n| IpNet::V4(n.trunc()));
            }
            Ipv6Net::new(v6, bits).ok().map(|n| IpNet::V6(n.trunc()))
        }
    }
}

/// Parse `10.*`, `192.0.2.*`, `10.1.*.*` style masks as IPv4 networks.
fn parse_octet_wildcard(text: &str) -> Option<Ipv4Net> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() > 4 {
        return None;
    }

    let mut octets = [0u8; 4];
    let mut numeric = 0;
    let mut seen_star = false;
    for (i, part) in parts.iter().enumerate() {
        if *part == "*" {
            seen_star = true;
        } else if seen_star {
            return None;
        } else {
            octets[i] = part.parse().ok()?;
            numeric += 1;
        }
    }

    if !seen_star || numeric == 0 {
        return None;
    }
    Ipv4Net::new(Ipv4Addr::from(octets), numeric * 8).ok()
}

/// Fold an IPv4-mapped IPv6 address into plain IPv4.
pub fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// CIDR containment after family normalization. A family mismatch never
/// matches; a zero-length prefix matches the whole family.
pub fn cidr_contains(net: &IpNet, ip: IpAddr) -> bool {
    match (net, normalize_ip(ip)) {
        (IpNet::V4(net), IpAddr::V4(v4)) => net.contains(&v4),
        (IpNet::V6(net), IpAddr::V6(v6)) => net.contains(&v6),
        _ => false,
    }
}

/// The first `bits` bits of an IPv4 address, remaining bits zeroed.
pub(crate) fn mask_v4(addr: Ipv4Addr, bits: u8) -> u32 {
    let value = u32::from(addr);
    match bits {
        0 => 0,
        b if b >= 32 => value,
        b => value & (u32::MAX << (32 - b)),
    }
}

/// The first `bits` bits of an IPv6 address, remaining bits zeroed.
pub(crate) fn mask_v6(addr: Ipv6Addr, bits: u8) -> u128 {
    let value = u128::from(addr);
    match bits {
        0 => 0,
        b if b >= 128 => value,
        b => value & (u128::MAX << (128 - b)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Star,
    Any,
    Lit(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                // Collapse runs of '*'
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
            }
            '?' => tokens.push(Token::Any),
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(Token::Lit(escaped.to_ascii_lowercase())),
                None => tokens.push(Token::Lit('\\')),
            },
            other => tokens.push(Token::Lit(other.to_ascii_lowercase())),
        }
    }
    tokens
}

/// Wildcard matching with `*`, `?` and `\` escapes, ASCII case-insensitive.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = tokenize(pattern);
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();

    let mut p = 0;
    let mut t = 0;
    let mut star_p = None;
    let mut star_t = 0;

    while t < text.len() {
        match pattern.get(p) {
            Some(Token::Any) => {
                p += 1;
                t += 1;
            }
            Some(Token::Lit(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            Some(Token::Star) => {
                star_p = Some(p);
                star_t = t;
                p += 1;
            }
            _ => match star_p {
                // Backtrack: let the last '*' swallow one more character
                Some(sp) => {
                    p = sp + 1;
                    star_t += 1;
                    t = star_t;
                }
                None => return false,
            },
        }
    }

    while pattern.get(p) == Some(&Token::Star) {
        p += 1;
    }
    p == pattern.len()
}

/// Check that the mask parts together carry at least `min` characters
/// that are not wildcards or separators.
pub fn valid_wild_card(min: usize, parts: &[&str]) -> bool {
    if min == 0 {
        return true;
    }
    let mut nonwild = 0;
    for c in parts.iter().flat_map(|p| p.chars()) {
        if !KWILD_CHARS.contains(&c) {
            nonwild += 1;
            if nonwild >= min {
                return true;
            }
        }
    }
    false
}

/// Free-text variant of [`valid_wild_card`] for realname and reservation
/// masks. A mask without any wildcard is always acceptable.
pub fn valid_wild_card_simple(min: usize, mask: &str) -> bool {
    let mut nonwild = 0;
    let mut wild = 0;
    let mut chars = mask.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.next().is_some() => nonwild += 1,
            '*' | '?' => wild += 1,
            _ => nonwild += 1,
        }
        if nonwild >= min {
            return true;
        }
    }
    wild == 0
}
