//! Store, routing and enforcement properties exercised through the public
//! library API.

use slircd_bans::config::Config;
use slircd_bans::error::{BanError, PermissionError, ValidationError};
use slircd_bans::handlers::{Context, HandlerResult, Registry, split_line};
use slircd_bans::security::{BanKind, BanPattern, BanRecord, BanStore, UserContext};
use slircd_bans::state::Matrix;
use slircd_bans::sync::{Capability, CommandSet, Issuer, LinkState, PeerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

const NOW: i64 = 1_700_000_000;

fn matrix(extra: &str) -> Matrix {
    let config: Config = toml::from_str(&format!(
        "[server]\nname = \"irc.example.net\"\nsid = \"0AB\"\n{extra}"
    ))
    .unwrap();
    let mut matrix = Matrix::new(&config, BanStore::new());
    matrix.rehash(&config, NOW).unwrap();
    matrix
}

fn oper() -> Issuer {
    Issuer {
        name: "alice".into(),
        username: "a".into(),
        host: "staff.example.net".into(),
        server: "irc.example.net".into(),
        privileges: CommandSet::all(),
        service: false,
    }
}

fn run(matrix: &mut Matrix, line: &str) -> HandlerResult {
    let (command, args) = split_line(line).unwrap();
    let issuer = oper();
    let mut ctx = Context {
        matrix,
        issuer: &issuer,
        now: NOW,
    };
    Registry::new().dispatch(&mut ctx, command, &args).unwrap()
}

fn connect(matrix: &mut Matrix, nick: &str, user: &str, host: &str, ip: &str) {
    let id = matrix.accept(ip.parse().unwrap()).unwrap();
    let conn = matrix.clients.get_mut(id).unwrap();
    conn.nick = nick.to_string();
    conn.username = user.to_string();
    conn.host = host.to_string();
    matrix.register(id).unwrap();
}

fn link(
    matrix: &mut Matrix,
    name: &str,
    caps: &[Capability],
) -> mpsc::Receiver<Arc<PeerMessage>> {
    let (tx, rx) = mpsc::channel(8);
    matrix
        .router
        .add_link(LinkState::new(name, caps.iter().copied().collect(), tx));
    rx
}

#[test]
fn longest_prefix_wins_address_lookup() {
    let mut store = BanStore::new();
    store
        .add(BanRecord::new(BanPattern::dline("10.0.0.0/8").unwrap(), "wide", NOW, 0))
        .unwrap();
    let narrow = store
        .add(BanRecord::new(BanPattern::dline("10.1.2.0/24").unwrap(), "narrow", NOW, 0))
        .unwrap();
    store
        .add(BanRecord::new(BanPattern::dline("10.1.0.0/16").unwrap(), "mid", NOW, 0))
        .unwrap();

    let ip = "10.1.2.3".parse().unwrap();
    let (id, record) = store
        .find_by_address(BanKind::Dline, &UserContext::for_address(ip))
        .unwrap();
    assert_eq!(id, narrow);
    assert_eq!(record.reason, "narrow");
}

#[test]
fn equal_prefix_prefers_most_recent() {
    let mut store = BanStore::new();
    store
        .add(BanRecord::new(BanPattern::kline("*", "192.0.2.0/24").unwrap(), "old", NOW, 0))
        .unwrap();
    let newer = store
        .add(BanRecord::new(BanPattern::kline("bob", "192.0.2.0/24").unwrap(), "new", NOW, 0))
        .unwrap();

    let user = UserContext {
        username: "bob",
        hostname: "host.example",
        sockhost: "192.0.2.9",
        ip: Some("192.0.2.9".parse().unwrap()),
        ..Default::default()
    };
    let (id, _) = store.find_by_address(BanKind::Kline, &user).unwrap();
    assert_eq!(id, newer);
}

#[test]
fn duplicate_add_references_first() {
    let mut store = BanStore::new();
    let first = store
        .add(BanRecord::new(BanPattern::xline("*Bot*").unwrap(), "one", NOW, 0))
        .unwrap();
    let err = store
        .add(BanRecord::new(BanPattern::xline("*bot*").unwrap(), "two", NOW, 0))
        .unwrap_err();
    assert!(matches!(err, BanError::Duplicate { existing, .. } if existing == first));
    assert_eq!(store.len(), 1);
}

#[test]
fn configured_ban_cannot_be_removed() {
    let mut store = BanStore::new();
    let id = store
        .add(BanRecord::from_config(
            BanPattern::resv("#staff").unwrap(),
            "staff only",
            NOW,
        ))
        .unwrap();

    let err = store.remove(id).unwrap_err();
    assert!(matches!(
        err,
        BanError::Permission(PermissionError::NotPersisted(_))
    ));
    assert!(store.get(id).is_some());
    assert_eq!(store.len(), 1);
}

#[test]
fn sweep_removes_only_expired_temporary_bans() {
    let mut store = BanStore::new();
    store
        .add(BanRecord::new(BanPattern::kline("*", "a.example").unwrap(), "due", NOW, 60))
        .unwrap();
    store
        .add(BanRecord::new(BanPattern::kline("*", "b.example").unwrap(), "later", NOW, 120))
        .unwrap();
    store
        .add(BanRecord::new(BanPattern::kline("*", "c.example").unwrap(), "forever", NOW, 0))
        .unwrap();

    let removed = store.sweep_expired(NOW + 60);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].reason, "due");

    let removed = store.sweep_expired(NOW + 1_000_000);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].reason, "later");
    assert_eq!(store.len(), 1);
}

#[test]
fn cluster_ban_goes_to_every_cluster_and_applies_here() {
    let mut m = matrix(
        "[[cluster]]\nserver = \"leaf1.*\"\ntypes = [\"kline\"]\n\
         [[cluster]]\nserver = \"leaf2.*\"\ntypes = [\"kline\"]\n",
    );
    let mut one = link(&mut m, "leaf1.example.net", &[Capability::Kln]);
    let mut two = link(&mut m, "leaf2.example.net", &[Capability::Kln]);
    let mut other = link(&mut m, "leaf3.example.net", &[Capability::Kln]);

    let outcome = run(&mut m, "KLINE *@spam.example :spam").unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.forwarded.len(), 2);
    assert_eq!(one.try_recv().unwrap().target(), "leaf1.*");
    assert_eq!(two.try_recv().unwrap().target(), "leaf2.*");
    assert!(other.try_recv().is_err());
}

#[test]
fn targeted_ban_applies_only_on_matching_server() {
    let mut m = matrix("");
    let outcome = run(&mut m, "KLINE *@spam.example ON irc.* :spam").unwrap();
    assert!(outcome.applied);

    let outcome = run(&mut m, "DLINE 198.51.100.0/24 ON other.example.net :net").unwrap();
    assert!(!outcome.applied);
    assert_eq!(m.bans.count(BanKind::Dline), 0);
}

#[test]
fn kline_sweep_leaves_non_matching_clients() {
    let mut m = matrix("");
    connect(&mut m, "bob", "bob", "host.example", "192.0.2.10");
    connect(&mut m, "alice", "alice", "other.example", "192.0.2.11");

    let outcome = run(&mut m, "KLINE bob@host.example :spam").unwrap();
    assert_eq!(outcome.disconnected, 1);

    let exits = m.clients.drain_exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].mask, "bob!bob@host.example");
    assert_eq!(exits[0].reason, "spam");
    m.clients.reap();
    assert!(m.clients.find_by_nick("alice").is_some());
    assert!(m.clients.find_by_nick("bob").is_none());
}

#[test]
fn dline_rejects_addresses_inside_the_block() {
    let mut m = matrix("");
    run(&mut m, "DLINE 192.0.2.0/24 :net").unwrap();

    let hit = m.accept("192.0.2.17".parse().unwrap()).unwrap_err();
    assert_eq!(hit.reason, "net");
    assert!(m.accept("192.0.3.1".parse().unwrap()).is_ok());
}

#[test]
fn minimum_non_wildcard_count() {
    let mut m = matrix("[bans]\nmin_nonwildcard = 4\n");
    let err = run(&mut m, "KLINE * :all").unwrap_err();
    assert!(matches!(
        err,
        BanError::Validation(ValidationError::TooFewNonWildcard { required: 4, .. })
    ));
    assert!(run(&mut m, "KLINE bad*host :spam").unwrap().applied);
}

#[test]
fn auth_exempt_client_survives_kline_sweep() {
    let mut m = matrix("[[auth]]\nhost = \"*.staff.example\"\nkline_exempt = true\n");
    connect(&mut m, "ops", "ops", "box.staff.example", "192.0.2.20");
    connect(&mut m, "bob", "bob", "box.example", "192.0.2.21");

    let outcome = run(&mut m, "KLINE *@*example :sweep").unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.disconnected, 1);

    let exits = m.clients.drain_exits();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].mask, "bob!bob@box.example");
    m.clients.reap();
    assert!(m.clients.find_by_nick("ops").is_some());

    let err = run(&mut m, "DLINE ops :exempt").unwrap_err();
    assert!(matches!(err, BanError::Validation(ValidationError::Exempt(_))));
}
