//! Hashed address index for K-lines and D-lines.
//!
//! Every address-based ban is filed in one of [`ATABLE_SIZE`] buckets:
//!
//! - IPv4 masks hash their network bits, prefix rounded down to a multiple
//!   of 8. A lookup probes the buckets for prefixes 32, 24, 16, 8 and 0.
//! - IPv6 masks do the same in 16-bit steps (128, 112, ..., 0).
//! - Hostname masks hash the longest dot-suffix free of wildcards
//!   (`*.example.net` hashes `example.net`, `*` hashes the empty string).
//!   A lookup probes each dot-suffix of the client's hostname and textual
//!   address, then bucket 0.
//!
//! Lookups then filter the probed buckets by actual matching, so hash
//! collisions only cost time.

use super::hostmask::{HostMask, mask_v4, mask_v6, wildcard_match};
use super::xlines::{BanId, BanKind, UserContext};
use ipnet::IpNet;
use std::net::IpAddr;

/// Number of hash buckets. Must be a power of two.
pub const ATABLE_SIZE: usize = 4096;

const _: () = assert!(ATABLE_SIZE.is_power_of_two());

/// Shape of an indexed mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskType {
    Host,
    Ipv4,
    Ipv6,
}

/// One indexed ban.
#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub owner: BanId,
    pub kind: BanKind,
    pub mask_type: MaskType,
    pub mask: HostMask,
    /// Username pattern for K-lines.
    pub username: Option<String>,
}

impl AddressEntry {
    pub fn new(owner: BanId, kind: BanKind, mask: HostMask, username: Option<String>) -> Self {
        let mask_type = match &mask {
            HostMask::Cidr(IpNet::V4(_)) => MaskType::Ipv4,
            HostMask::Cidr(IpNet::V6(_)) => MaskType::Ipv6,
            HostMask::Wildcard(_) => MaskType::Host,
        };
        Self {
            owner,
            kind,
            mask_type,
            mask,
            username,
        }
    }

    /// Ranking among matching entries: larger CIDR prefixes first, every
    /// CIDR above every hostname mask, newer records break ties.
    fn precedence(&self) -> (i16, BanId) {
        let specificity = self.mask.prefix_len().map_or(-1, i16::from);
        (specificity, self.owner)
    }

    fn matches(&self, user: &UserContext<'_>) -> bool {
        let user_ok = match (&self.username, user.username) {
            (Some(pattern), name) => wildcard_match(pattern, name),
            (None, _) => true,
        };
        user_ok && self.mask.matches(user.hostname, user.sockhost, user.ip)
    }
}

/// Fixed-size bucket table of address-based bans.
#[derive(Debug)]
pub struct AddressTable {
    buckets: Vec<Vec<AddressEntry>>,
    len: usize,
}

impl Default for AddressTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressTable {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); ATABLE_SIZE],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, entry: AddressEntry) {
        let bucket = mask_hash(&entry.mask);
        self.buckets[bucket].push(entry);
        self.len += 1;
    }

    /// Remove the entry owned by `owner`. Returns whether it was present.
    pub fn remove(&mut self, owner: BanId, mask: &HostMask) -> bool {
        let bucket = &mut self.buckets[mask_hash(mask)];
        match bucket.iter().position(|e| e.owner == owner) {
            Some(pos) => {
                bucket.swap_remove(pos);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    /// Most specific entry of `kind` matching the client.
    pub fn find(&self, kind: BanKind, user: &UserContext<'_>) -> Option<&AddressEntry> {
        let mut best: Option<&AddressEntry> = None;
        let mut consider = |bucket: usize| {
            for entry in &self.buckets[bucket] {
                if entry.kind != kind || !entry.matches(user) {
                    continue;
                }
                if best.is_none_or(|b| entry.precedence() > b.precedence()) {
                    best = Some(entry);
                }
            }
        };

        if let Some(ip) = user.ip {
            match super::hostmask::normalize_ip(ip) {
                IpAddr::V4(v4) => {
                    for bits in [32u8, 24, 16, 8, 0] {
                        consider(hash_ipv4(mask_v4(v4, bits)));
                    }
                }
                IpAddr::V6(v6) => {
                    for bits in (0..=128u8).rev().step_by(16) {
                        consider(hash_ipv6(mask_v6(v6, bits)));
                    }
                }
            }
        }

        for name in [user.hostname, user.sockhost] {
            if name.is_empty() {
                continue;
            }
            let mut suffix = name;
            loop {
                consider(hash_text(suffix));
                match suffix.split_once('.') {
                    Some((_, rest)) => suffix = rest,
                    None => break,
                }
            }
        }
        consider(0);

        best
    }

    /// All entries, in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &AddressEntry> {
        self.buckets.iter().flatten()
    }
}

/// Bucket for a mask.
fn mask_hash(mask: &HostMask) -> usize {
    match mask {
        HostMask::Cidr(IpNet::V4(net)) => {
            let bits = net.prefix_len() - net.prefix_len() % 8;
            hash_ipv4(mask_v4(net.network(), bits))
        }
        HostMask::Cidr(IpNet::V6(net)) => {
            let bits = net.prefix_len() - net.prefix_len() % 16;
            hash_ipv6(mask_v6(net.network(), bits))
        }
        HostMask::Wildcard(pattern) => hash_text(mask_suffix(pattern)),
    }
}

/// Longest dot-suffix of `pattern` that contains no wildcard.
fn mask_suffix(pattern: &str) -> &str {
    let mut suffix = pattern;
    // Walk back from the end to the last wildcard, then forward to the
    // next label boundary.
    if let Some(pos) = pattern.rfind(['*', '?']) {
        suffix = match pattern[pos..].find('.') {
            Some(dot) => &pattern[pos + dot + 1..],
            None => "",
        };
    }
    suffix
}

fn hash_ipv4(value: u32) -> usize {
    if value == 0 {
        return 0;
    }
    ((value ^ (value >> 12) ^ (value >> 24)) as usize) & (ATABLE_SIZE - 1)
}

fn hash_ipv6(value: u128) -> usize {
    if value == 0 {
        return 0;
    }
    let folded = (value as u64) ^ ((value >> 64) as u64);
    let folded = folded ^ (folded >> 32);
    let folded = folded as u32;
    ((folded ^ (folded >> 12) ^ (folded >> 24)) as usize) & (ATABLE_SIZE - 1)
}

/// FNV-1a over the lowercased text; the empty string maps to bucket 0.
fn hash_text(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let mut hash: u32 = 0x811c_9dc5;
    for byte in text.bytes() {
        hash ^= u32::from(byte.to_ascii_lowercase());
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash as usize) & (ATABLE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, kind: BanKind, mask: &str, user: Option<&str>) -> AddressEntry {
        AddressEntry::new(
            BanId(id),
            kind,
            HostMask::parse(mask).unwrap(),
            user.map(str::to_string),
        )
    }

    fn client<'a>(username: &'a str, hostname: &'a str, sockhost: &'a str) -> UserContext<'a> {
        UserContext {
            username,
            hostname,
            sockhost,
            ip: sockhost.parse().ok(),
            ..Default::default()
        }
    }

    #[test]
    fn mask_suffix_stops_at_last_wildcard() {
        assert_eq!(mask_suffix("*.example.net"), "example.net");
        assert_eq!(mask_suffix("irc.example.net"), "irc.example.net");
        assert_eq!(mask_suffix("*"), "");
        assert_eq!(mask_suffix("bad*host"), "");
        assert_eq!(mask_suffix("a?b.c*d.example.net"), "example.net");
    }

    #[test]
    fn finds_cidr_at_any_octet_boundary() {
        let mut table = AddressTable::new();
        table.insert(entry(1, BanKind::Dline, "10.0.0.0/8", None));
        table.insert(entry(2, BanKind::Dline, "192.0.2.0/26", None));

        let hit = table.find(BanKind::Dline, &client("", "", "10.20.30.40")).unwrap();
        assert_eq!(hit.owner, BanId(1));

        let hit = table.find(BanKind::Dline, &client("", "", "192.0.2.63")).unwrap();
        assert_eq!(hit.owner, BanId(2));
        assert!(table.find(BanKind::Dline, &client("", "", "192.0.2.64")).is_none());
    }

    #[test]
    fn finds_ipv6_masks() {
        let mut table = AddressTable::new();
        table.insert(entry(1, BanKind::Dline, "2001:db8::/36", None));
        let hit = table.find(BanKind::Dline, &client("", "", "2001:db8:abc::1"));
        assert_eq!(hit.map(|e| e.owner), Some(BanId(1)));
        assert!(table.find(BanKind::Dline, &client("", "", "2001:db9::1")).is_none());
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = AddressTable::new();
        table.insert(entry(1, BanKind::Dline, "192.0.2.0/24", None));
        table.insert(entry(2, BanKind::Dline, "192.0.2.128/25", None));
        table.insert(entry(3, BanKind::Dline, "192.0.0.0/16", None));

        let hit = table.find(BanKind::Dline, &client("", "", "192.0.2.200")).unwrap();
        assert_eq!(hit.owner, BanId(2));
    }

    #[test]
    fn cidr_outranks_hostname_and_newer_breaks_ties() {
        let mut table = AddressTable::new();
        table.insert(entry(5, BanKind::Kline, "*", Some("*")));
        table.insert(entry(1, BanKind::Kline, "0.0.0.0/0", Some("*")));
        let hit = table.find(BanKind::Kline, &client("u", "h.example", "203.0.113.1")).unwrap();
        assert_eq!(hit.owner, BanId(1));

        table.insert(entry(7, BanKind::Kline, "0.0.0.0/0", Some("*")));
        let hit = table.find(BanKind::Kline, &client("u", "h.example", "203.0.113.1")).unwrap();
        assert_eq!(hit.owner, BanId(7));
    }

    #[test]
    fn finds_hostname_masks_by_suffix() {
        let mut table = AddressTable::new();
        table.insert(entry(1, BanKind::Kline, "*.evil.example", Some("*")));
        table.insert(entry(2, BanKind::Kline, "bad*host", Some("*")));

        let hit = table.find(BanKind::Kline, &client("u", "a.b.EVIL.example", "198.51.100.1"));
        assert_eq!(hit.map(|e| e.owner), Some(BanId(1)));
        let hit = table.find(BanKind::Kline, &client("u", "bad.evil.host", "198.51.100.1"));
        assert_eq!(hit.map(|e| e.owner), Some(BanId(2)));
        assert!(table.find(BanKind::Kline, &client("u", "good.host", "198.51.100.1")).is_none());
    }

    #[test]
    fn hostname_mask_catches_textual_address() {
        let mut table = AddressTable::new();
        table.insert(entry(1, BanKind::Kline, "198.51.100.1?", Some("*")));
        let hit = table.find(BanKind::Kline, &client("u", "198.51.100.12", "198.51.100.12"));
        assert_eq!(hit.map(|e| e.owner), Some(BanId(1)));
    }

    #[test]
    fn username_and_kind_filter() {
        let mut table = AddressTable::new();
        table.insert(entry(1, BanKind::Kline, "192.0.2.0/24", Some("~*")));
        assert!(table.find(BanKind::Kline, &client("alice", "", "192.0.2.1")).is_none());
        assert!(table.find(BanKind::Kline, &client("~alice", "", "192.0.2.1")).is_some());
        assert!(table.find(BanKind::Dline, &client("~alice", "", "192.0.2.1")).is_none());
    }

    #[test]
    fn remove_unlinks_entry() {
        let mut table = AddressTable::new();
        let mask = HostMask::parse("192.0.2.0/24").unwrap();
        table.insert(entry(1, BanKind::Dline, "192.0.2.0/24", None));
        assert_eq!(table.len(), 1);
        assert!(table.remove(BanId(1), &mask));
        assert!(!table.remove(BanId(1), &mask));
        assert!(table.is_empty());
        assert!(table.find(BanKind::Dline, &client("", "", "192.0.2.1")).is_none());
    }
}
