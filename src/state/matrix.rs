//! The Matrix - central state for ban enforcement.
//!
//! Owns the ban store, the local connections, the propagation router and
//! the operator configuration. Everything runs on one task; handlers get a
//! `&mut Matrix` for the duration of a command.

use super::client::{ClientRegistry, ConnId};
use crate::config::{AuthBlock, BanLimitsConfig, Config, OperBlock, static_records};
use crate::error::ValidationError;
use crate::event::Event;
use crate::security::enforce::{self, BanHit};
use crate::security::{BanKind, BanStore, Timestamp};
use crate::metrics;
use crate::sync::router::{ClusterEntry, Issuer, PropagationRouter, SharedEntry};
use std::net::IpAddr;
use tracing::{debug, info};

/// Name of the recurring ban expiry event.
pub const EXPIRY_EVENT: &str = "temporary ban expiry";

/// Current Unix time in seconds.
pub fn unix_now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Local server identity.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub sid: String,
    pub description: String,
}

/// Central state.
#[derive(Debug)]
pub struct Matrix {
    pub server_info: ServerInfo,
    pub limits: BanLimitsConfig,
    pub bans: BanStore,
    pub clients: ClientRegistry,
    pub router: PropagationRouter,
    pub opers: Vec<OperBlock>,
    /// Auth blocks, first match wins.
    pub auth: Vec<AuthBlock>,
    /// Services server names.
    pub services: Vec<String>,
}

impl Matrix {
    /// Build the state from configuration and an already loaded store.
    ///
    /// Peer links are registered separately, once their send queues exist.
    pub fn new(config: &Config, bans: BanStore) -> Self {
        let mut router = PropagationRouter::new(&config.server.name);
        router.set_clusters(config.cluster.iter().map(ClusterEntry::from).collect());
        router.set_shared(config.shared.iter().map(SharedEntry::from).collect());

        Self {
            server_info: ServerInfo {
                name: config.server.name.clone(),
                sid: config.server.sid.clone(),
                description: config.server.description.clone(),
            },
            limits: config.bans.clone(),
            bans,
            clients: ClientRegistry::new(),
            router,
            opers: config.oper.clone(),
            auth: config.auth.clone(),
            services: service_names(config),
        }
    }

    /// Operator block by name (case-insensitive).
    pub fn find_oper(&self, name: &str) -> Option<&OperBlock> {
        self.opers.iter().find(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// Identity of the issuer of a relayed command. Commands from a services
    /// server carry the service flag.
    pub fn remote_issuer(&self, source: &str) -> Issuer {
        let mut issuer = Issuer::from_source(source);
        issuer.service = self
            .services
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&issuer.server));
        issuer
    }

    /// Accept a socket unless its address is D-lined.
    pub fn accept(&mut self, ip: IpAddr) -> Result<ConnId, BanHit> {
        if let Some(hit) = enforce::check_connect(&self.bans, ip) {
            info!(%ip, ban = %hit.id, "Rejected D-lined connection");
            metrics::record_enforced(hit.kind, 1);
            return Err(hit);
        }
        Ok(self.clients.accept(ip))
    }

    /// Complete registration of a connection, or disconnect it if banned.
    ///
    /// The first matching auth block sets the connection's exemptions
    /// before the ban checks run. A connection already scheduled for
    /// disconnection is left alone.
    pub fn register(&mut self, id: ConnId) -> Result<(), BanHit> {
        let Some(conn) = self.clients.get_mut(id) else {
            debug!(id, "Registration for unknown connection ignored");
            return Ok(());
        };
        if conn.dead {
            debug!(id, "Registration for exiting connection ignored");
            return Ok(());
        }
        if let Some(block) = self.auth.iter().find(|b| b.matches(&conn.user_context())) {
            conn.exempt_kline = block.kline_exempt;
            conn.exempt_xline = block.xline_exempt;
        }

        let conn = &*conn;
        if let Some(hit) = enforce::check_registration(&self.bans, conn) {
            info!(
                client = %conn.mask(),
                kind = hit.kind.name(),
                ban = %hit.id,
                "Rejected banned client at registration"
            );
            self.clients.exit_client(id, &hit.reason);
            metrics::record_enforced(hit.kind, 1);
            return Err(hit);
        }
        self.clients.register(id);
        Ok(())
    }

    /// Remove every temporary ban that has expired by `now`.
    pub fn expire_bans(&mut self, now: Timestamp) -> usize {
        let expired = self.bans.sweep_expired(now);
        for record in &expired {
            metrics::record_ban_expired(record.kind());
        }
        expired.len()
    }

    /// Apply a new configuration: limits, operators, cluster and shared
    /// blocks, and the static ban set. Connections matching a configured
    /// ban are disconnected.
    pub fn rehash(&mut self, config: &Config, now: Timestamp) -> Result<usize, ValidationError> {
        let records = static_records(config, now)?;

        self.limits = config.bans.clone();
        self.opers = config.oper.clone();
        self.auth = config.auth.clone();
        self.services = service_names(config);
        self.router
            .set_clusters(config.cluster.iter().map(ClusterEntry::from).collect());
        self.router
            .set_shared(config.shared.iter().map(SharedEntry::from).collect());

        let loaded = self.bans.reload_static(records);

        let configured: Vec<_> = BanKind::ALL
            .into_iter()
            .filter(|kind| kind.is_enforced())
            .flat_map(|kind| self.bans.iter(kind))
            .filter(|(_, record)| !record.persisted)
            .map(|(_, record)| record.clone())
            .collect();
        let mut disconnected = 0;
        for record in &configured {
            let count = enforce::disconnect_matching_ban(&mut self.clients, record);
            metrics::record_enforced(record.kind(), count);
            disconnected += count;
        }

        info!(
            loaded,
            disconnected,
            static_bans = configured.len(),
            "Configuration reloaded"
        );
        Ok(loaded)
    }
}

fn service_names(config: &Config) -> Vec<String> {
    config.service.iter().map(|s| s.name.clone()).collect()
}

/// The recurring expiry sweep, scheduled on the main event queue.
pub fn expiry_event(limits: &BanLimitsConfig) -> Event<Matrix> {
    Event::recurring(EXPIRY_EVENT, limits.expiry_interval, |matrix: &mut Matrix, now| {
        let expired = matrix.expire_bans(now);
        if expired > 0 {
            debug!(expired, "Expiry sweep complete");
        }
    })
    .with_jitter(limits.expiry_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventQueue;
    use crate::state::client::Phase;
    use crate::security::{BanPattern, BanRecord};

    fn config(extra: &str) -> Config {
        toml::from_str(&format!(
            "[server]\nname = \"irc.example.net\"\nsid = \"0AB\"\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn dlined_address_is_refused_at_accept() {
        let mut store = BanStore::new();
        store
            .add(BanRecord::new(BanPattern::dline("203.0.113.0/24").unwrap(), "go", 0, 0))
            .unwrap();
        let mut matrix = Matrix::new(&config(""), store);

        assert!(matrix.accept("203.0.113.5".parse().unwrap()).is_err());
        assert!(matrix.accept("192.0.2.5".parse().unwrap()).is_ok());
        assert_eq!(matrix.clients.len(), 1);
    }

    #[test]
    fn klined_client_is_dropped_at_registration() {
        let mut store = BanStore::new();
        store
            .add(BanRecord::new(BanPattern::kline("*", "*.evil.example").unwrap(), "evil", 0, 0))
            .unwrap();
        let mut matrix = Matrix::new(&config(""), store);

        let id = matrix.accept("192.0.2.5".parse().unwrap()).unwrap();
        matrix.clients.get_mut(id).unwrap().host = "box.evil.example".to_string();
        let hit = matrix.register(id).unwrap_err();
        assert_eq!(hit.reason, "evil");
        assert_eq!(matrix.clients.drain_exits().len(), 1);
    }

    #[test]
    fn auth_block_exempts_client_at_registration() {
        let mut store = BanStore::new();
        store
            .add(BanRecord::new(BanPattern::kline("*", "*.example").unwrap(), "all", 0, 0))
            .unwrap();
        let mut matrix = Matrix::new(
            &config("[[auth]]\nhost = \"*.staff.example\"\nkline_exempt = true\n"),
            store,
        );

        let staff = matrix.accept("192.0.2.5".parse().unwrap()).unwrap();
        matrix.clients.get_mut(staff).unwrap().host = "box.staff.example".to_string();
        assert!(matrix.register(staff).is_ok());
        assert!(matrix.clients.get(staff).unwrap().exempt_kline);

        let other = matrix.accept("192.0.2.6".parse().unwrap()).unwrap();
        matrix.clients.get_mut(other).unwrap().host = "box.example".to_string();
        assert!(matrix.register(other).is_err());
    }

    #[test]
    fn exiting_connection_is_not_registered() {
        let mut matrix = Matrix::new(&config(""), BanStore::new());
        let id = matrix.accept("192.0.2.5".parse().unwrap()).unwrap();
        matrix.clients.exit_client(id, "gone");

        assert!(matrix.register(id).is_ok());
        assert_eq!(matrix.clients.get(id).unwrap().phase, Phase::Unknown);
        assert_eq!(matrix.clients.drain_exits().len(), 1);
    }

    #[test]
    fn expiry_event_sweeps_store() {
        let mut matrix = Matrix::new(&config(""), BanStore::new());
        matrix
            .bans
            .add(BanRecord::new(BanPattern::xline("*bot*").unwrap(), "t", 1000, 30))
            .unwrap();

        let mut events = EventQueue::with_seed(3);
        events.add(expiry_event(&matrix.limits), 1000);
        events.run(&mut matrix, 1059);
        assert_eq!(matrix.bans.len(), 1);
        events.run(&mut matrix, 1060);
        assert!(matrix.bans.is_empty());
    }

    #[test]
    fn remote_issuer_from_services_server_is_trusted() {
        let matrix = Matrix::new(
            &config("[[service]]\nname = \"services.example.net\"\n"),
            BanStore::new(),
        );
        assert!(matrix.remote_issuer("OperServ!s@services{SERVICES.example.net}").service);
        assert!(!matrix.remote_issuer("bob!b@h{hub.example.net}").service);
        assert!(matrix.remote_issuer("services.example.net").service);
    }

    #[test]
    fn rehash_swaps_static_bans_and_enforces_them() {
        let mut matrix = Matrix::new(&config(""), BanStore::new());
        let id = matrix.accept("192.0.2.5".parse().unwrap()).unwrap();
        matrix.clients.get_mut(id).unwrap().realname = "spam bot".to_string();
        matrix.register(id).unwrap();

        let loaded = matrix
            .rehash(&config("[[xline]]\ngecos = \"*bot*\"\nreason = \"bots\"\n"), 0)
            .unwrap();
        assert_eq!(loaded, 1);
        let exits = matrix.clients.drain_exits();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, "bots");

        assert_eq!(matrix.rehash(&config(""), 0).unwrap(), 0);
        assert!(matrix.bans.is_empty());
    }
}
