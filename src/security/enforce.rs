//! Ban enforcement against local connections.
//!
//! Two entry points:
//!
//! - [`disconnect_matching_ban`] runs once after a K-line, D-line or X-line
//!   is applied and disconnects every local connection it matches.
//! - [`check_connect`], [`check_registration`] and [`check_nick`] gate new
//!   connections against bans already in the store.

use super::ban_store::BanStore;
use super::xlines::{BanId, BanKind, BanMatch, BanRecord, UserContext};
use crate::state::client::{ClientRegistry, Connection};
use std::net::IpAddr;
use tracing::{debug, info};

/// A ban that matched a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanHit {
    pub id: BanId,
    pub kind: BanKind,
    pub reason: String,
}

impl BanHit {
    fn new(id: BanId, record: &BanRecord) -> Self {
        Self {
            id,
            kind: record.kind(),
            reason: record.reason.clone(),
        }
    }
}

fn is_exempt(conn: &Connection, kind: BanKind) -> bool {
    match kind {
        BanKind::Kline | BanKind::Dline => conn.exempt_kline,
        BanKind::Xline => conn.exempt_xline,
        BanKind::ResvChannel | BanKind::ResvNick => false,
    }
}

/// Disconnect every local connection matched by a newly applied ban.
///
/// Unregistered connections are scanned before registered ones. Ids are
/// snapshotted up front; a connection that disappears during the scan
/// (torn down along with an earlier match) is skipped, as is one already
/// scheduled for disconnection. Returns the number of connections this
/// sweep disconnected directly.
pub fn disconnect_matching_ban(clients: &mut ClientRegistry, record: &BanRecord) -> usize {
    let kind = record.kind();
    if !kind.is_enforced() {
        return 0;
    }

    let mut ids = clients.unknown_ids();
    ids.extend(clients.local_ids());

    let mut disconnected = 0;
    for id in ids {
        let Some(conn) = clients.get(id) else {
            continue;
        };
        if conn.dead || is_exempt(conn, kind) || !record.matches(&conn.user_context()) {
            continue;
        }

        info!(
            kind = kind.name(),
            mask = %record.describe(),
            client = %conn.mask(),
            "Disconnecting banned client"
        );
        if clients.exit_client(id, &record.reason) {
            disconnected += 1;
        }
    }

    debug!(kind = kind.name(), disconnected, "Ban sweep complete");
    disconnected
}

/// D-line check for a socket that has just been accepted.
pub fn check_connect(store: &BanStore, ip: IpAddr) -> Option<BanHit> {
    store
        .find_by_address(BanKind::Dline, &UserContext::for_address(ip))
        .map(|(id, record)| BanHit::new(id, record))
}

/// Full check for a connection completing registration: D-line, K-line,
/// X-line, then nickname reservations.
pub fn check_registration(store: &BanStore, conn: &Connection) -> Option<BanHit> {
    let user = conn.user_context();
    if !conn.exempt_kline {
        for kind in [BanKind::Dline, BanKind::Kline] {
            if let Some((id, record)) = store.find_by_address(kind, &user) {
                return Some(BanHit::new(id, record));
            }
        }
    }
    if !conn.exempt_xline
        && let Some((id, record)) = store.find_xline(&conn.realname)
    {
        return Some(BanHit::new(id, record));
    }
    check_nick(store, &conn.nick)
}

/// Reservation check for a requested nickname.
pub fn check_nick(store: &BanStore, nick: &str) -> Option<BanHit> {
    store
        .find_resv_nick(nick)
        .map(|(id, record)| BanHit::new(id, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::xlines::BanPattern;

    fn connect(clients: &mut ClientRegistry, ip: &str, user: &str, host: &str) -> u64 {
        let id = clients.accept(ip.parse().unwrap());
        let conn = clients.get_mut(id).unwrap();
        conn.username = user.to_string();
        conn.host = host.to_string();
        conn.realname = "Real".to_string();
        id
    }

    #[test]
    fn sweep_disconnects_matching_unknown_and_local() {
        let mut clients = ClientRegistry::new();
        let a = connect(&mut clients, "192.0.2.1", "a", "bad.evil.host");
        let b = connect(&mut clients, "192.0.2.2", "b", "bad.other.host");
        let c = connect(&mut clients, "192.0.2.3", "c", "good.host");
        clients.register(b);
        clients.register(c);

        let record = BanRecord::new(BanPattern::kline("*", "bad*host").unwrap(), "spam", 0, 0);
        assert_eq!(disconnect_matching_ban(&mut clients, &record), 2);

        let exits = clients.drain_exits();
        let ids: Vec<_> = exits.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert!(exits.iter().all(|e| e.reason == "spam"));
        assert!(!clients.get(c).unwrap().dead);
    }

    #[test]
    fn sweep_skips_exempt_and_dead() {
        let mut clients = ClientRegistry::new();
        let exempt = connect(&mut clients, "192.0.2.1", "a", "h");
        let dead = connect(&mut clients, "192.0.2.2", "b", "h");
        clients.get_mut(exempt).unwrap().exempt_kline = true;
        clients.exit_client(dead, "earlier");
        clients.drain_exits();

        let record = BanRecord::new(BanPattern::dline("192.0.2.0/24").unwrap(), "net", 0, 0);
        assert_eq!(disconnect_matching_ban(&mut clients, &record), 0);
        assert!(clients.drain_exits().is_empty());
    }

    #[test]
    fn sweep_tolerates_clients_destroyed_mid_scan() {
        let mut clients = ClientRegistry::new();
        let primary = connect(&mut clients, "192.0.2.1", "a", "h");
        let session = connect(&mut clients, "192.0.2.2", "a", "h");
        clients.get_mut(primary).unwrap().attached.push(session);

        let record = BanRecord::new(BanPattern::dline("192.0.2.0/24").unwrap(), "net", 0, 0);
        assert_eq!(disconnect_matching_ban(&mut clients, &record), 1);
        // The attached session went down with its primary
        assert_eq!(clients.drain_exits().len(), 2);
    }

    #[test]
    fn resv_is_not_enforced_by_sweep() {
        let mut clients = ClientRegistry::new();
        let id = connect(&mut clients, "192.0.2.1", "a", "h");
        clients.get_mut(id).unwrap().nick = "badnick".to_string();
        let record = BanRecord::new(BanPattern::resv("badnick").unwrap(), "r", 0, 0);
        assert_eq!(disconnect_matching_ban(&mut clients, &record), 0);
    }

    #[test]
    fn registration_checks() {
        let mut store = BanStore::new();
        store
            .add(BanRecord::new(BanPattern::xline("*bot*").unwrap(), "no bots", 0, 0))
            .unwrap();
        store
            .add(BanRecord::new(BanPattern::dline("198.51.100.0/24").unwrap(), "net", 0, 0))
            .unwrap();

        let mut clients = ClientRegistry::new();
        let id = connect(&mut clients, "192.0.2.1", "a", "h");
        clients.get_mut(id).unwrap().realname = "I am a bot".to_string();
        let hit = check_registration(&store, clients.get(id).unwrap()).unwrap();
        assert_eq!(hit.kind, BanKind::Xline);

        clients.get_mut(id).unwrap().exempt_xline = true;
        assert!(check_registration(&store, clients.get(id).unwrap()).is_none());

        store
            .add(BanRecord::new(BanPattern::resv("Bad*").unwrap(), "reserved", 0, 0))
            .unwrap();
        clients.get_mut(id).unwrap().nick = "badger".to_string();
        let hit = check_registration(&store, clients.get(id).unwrap()).unwrap();
        assert_eq!(hit.kind, BanKind::ResvNick);

        let hit = check_connect(&store, "198.51.100.7".parse().unwrap()).unwrap();
        assert_eq!(hit.reason, "net");
        assert!(check_connect(&store, "192.0.2.1".parse().unwrap()).is_none());
    }
}
