//! Ban propagation between servers.
//!
//! # Locally issued commands
//!
//! - With an explicit target mask (`KLINE ... ON <mask>`), the command is
//!   sent once down every link leading to a server that matches the mask,
//!   provided the link has the command's capability. It is applied here
//!   only if this server's name matches the mask.
//! - Without a target, a copy is sent for every cluster block covering the
//!   command, addressed to that block's server mask, and the command is
//!   always applied here.
//!
//! # Commands from a peer
//!
//! The command is relayed unchanged to every other matching, capable link
//! (never back to the link it arrived on). It is applied here only if the
//! target matches this server and the issuer is the trusted service or is
//! covered by a shared block for that command.

use super::capab::{BanCommand, CommandSet};
use super::link::{LinkState, PeerMessage};
use super::topology::TopologyGraph;
use crate::config::{ClusterBlock, OperBlock, SharedBlock};
use crate::error::PermissionError;
use crate::security::wildcard_match;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Who issued a ban command.
#[derive(Debug, Clone)]
pub struct Issuer {
    /// Nickname or operator name; a server name for server-issued bans.
    pub name: String,
    pub username: String,
    pub host: String,
    /// Server the issuer is connected to.
    pub server: String,
    /// Commands a local operator may issue.
    pub privileges: CommandSet,
    /// The trusted service identity.
    pub service: bool,
}

impl Issuer {
    /// A local operator.
    pub fn from_oper(block: &OperBlock, server: &str) -> Self {
        Self {
            name: block.name.clone(),
            username: block.user.clone(),
            host: block.host.clone(),
            server: server.to_string(),
            privileges: block.privileges,
            service: block.service,
        }
    }

    /// An operator on another server.
    pub fn remote(nick: &str, username: &str, host: &str, server: &str) -> Self {
        Self {
            name: nick.to_string(),
            username: username.to_string(),
            host: host.to_string(),
            server: server.to_string(),
            privileges: CommandSet::default(),
            service: false,
        }
    }

    /// Parse the source of a relayed command: `nick!user@host{server}`, or
    /// a bare server name for a server-issued ban.
    pub fn from_source(source: &str) -> Self {
        if let Some((who, rest)) = source.split_once('{')
            && let Some(server) = rest.strip_suffix('}')
            && let Some((nick, userhost)) = who.split_once('!')
            && let Some((user, host)) = userhost.split_once('@')
        {
            return Self::remote(nick, user, host, server);
        }
        Self::remote(source, "", source, source)
    }

    /// `nick!user@host{server}`, as shown in notices and used as the
    /// source of relayed commands. Servers are shown by name.
    pub fn oper_name(&self) -> String {
        if self.username.is_empty() {
            return self.name.clone();
        }
        format!(
            "{}!{}@{}{{{}}}",
            self.name, self.username, self.host, self.server
        )
    }
}

/// A copy of a command sent down one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    pub link: String,
    pub target: String,
}

/// What to do with a command on this server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    Apply,
    /// The target mask does not match this server.
    NotAddressed,
    /// Addressed here, but the issuer is not trusted to set it.
    Untrusted(PermissionError),
}

/// Routing decision for one command.
#[derive(Debug, Clone)]
pub struct Routing {
    pub forwarded: Vec<Forward>,
    pub local: LocalAction,
}

/// Where local bans are copied.
#[derive(Debug, Clone)]
pub struct ClusterEntry {
    pub server: String,
    pub types: CommandSet,
}

impl From<&ClusterBlock> for ClusterEntry {
    fn from(block: &ClusterBlock) -> Self {
        Self {
            server: block.server.clone(),
            types: block.types,
        }
    }
}

/// Which remote issuers may set bans here.
#[derive(Debug, Clone)]
pub struct SharedEntry {
    pub server: String,
    pub user: String,
    pub host: String,
    pub types: CommandSet,
}

impl From<&SharedBlock> for SharedEntry {
    fn from(block: &SharedBlock) -> Self {
        Self {
            server: block.server.clone(),
            user: block.user.clone(),
            host: block.host.clone(),
            types: block.types,
        }
    }
}

/// Decides where ban commands go and whether they apply here.
#[derive(Debug)]
pub struct PropagationRouter {
    topology: TopologyGraph,
    /// Direct peers, keyed by lowercased name.
    links: BTreeMap<String, LinkState>,
    clusters: Vec<ClusterEntry>,
    shared: Vec<SharedEntry>,
}

impl PropagationRouter {
    pub fn new(local_name: &str) -> Self {
        Self {
            topology: TopologyGraph::new(local_name),
            links: BTreeMap::new(),
            clusters: Vec::new(),
            shared: Vec::new(),
        }
    }

    pub fn local_name(&self) -> &str {
        self.topology.local_name()
    }

    pub fn topology(&self) -> &TopologyGraph {
        &self.topology
    }

    /// Register a directly connected peer.
    pub fn add_link(&mut self, link: LinkState) {
        let local = self.local_name().to_string();
        self.topology.add_server(&link.name, 1, &local);
        self.links.insert(link.name.to_ascii_lowercase(), link);
    }

    /// Record a server introduced behind `via`.
    pub fn introduce(&mut self, name: &str, via: &str) {
        let hopcount = self.topology.get(via).map_or(1, |info| info.hopcount + 1);
        self.topology.add_server(name, hopcount, via);
    }

    /// Forget a peer and every server behind it.
    pub fn remove_link(&mut self, name: &str) -> Option<LinkState> {
        self.topology.remove_subtree(name);
        self.links.remove(&name.to_ascii_lowercase())
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkState> {
        self.links.values()
    }

    pub fn set_clusters(&mut self, clusters: Vec<ClusterEntry>) {
        self.clusters = clusters;
    }

    pub fn set_shared(&mut self, shared: Vec<SharedEntry>) {
        self.shared = shared;
    }

    /// Does this server's name match the mask?
    pub fn is_local_target(&self, mask: &str) -> bool {
        wildcard_match(mask, self.local_name())
    }

    /// Route a command issued on this server.
    ///
    /// `args` are the wire arguments after the target.
    pub fn route_local(
        &self,
        issuer: &Issuer,
        command: BanCommand,
        target: Option<&str>,
        args: Vec<String>,
    ) -> Routing {
        let source = issuer.oper_name();
        match target {
            Some(mask) => {
                let mut params = Vec::with_capacity(args.len() + 1);
                params.push(mask.to_string());
                params.extend(args);
                let msg = Arc::new(PeerMessage::new(&source, command, params));
                let forwarded = self.send_match_servs(None, mask, &msg);
                let local = if self.is_local_target(mask) {
                    LocalAction::Apply
                } else {
                    LocalAction::NotAddressed
                };
                Routing { forwarded, local }
            }
            None => {
                let mut params = Vec::with_capacity(args.len() + 1);
                params.push(String::new());
                params.extend(args);
                let template = PeerMessage::new(&source, command, params);
                Routing {
                    forwarded: self.cluster_distribute(&template),
                    local: LocalAction::Apply,
                }
            }
        }
    }

    /// Route a command that arrived from the peer `arrived_on`.
    pub fn route_remote(&self, issuer: &Issuer, arrived_on: &str, msg: PeerMessage) -> Routing {
        let target = msg.target().to_string();
        let command = msg.command;
        let forwarded = self.send_match_servs(Some(arrived_on), &target, &Arc::new(msg));

        let local = if !self.is_local_target(&target) {
            LocalAction::NotAddressed
        } else if issuer.service
            || self.shared_find(command, &issuer.server, &issuer.username, &issuer.host)
        {
            LocalAction::Apply
        } else {
            warn!(
                issuer = %issuer.oper_name(),
                command = command.name(),
                "Ignoring ban from unauthorized remote issuer"
            );
            LocalAction::Untrusted(PermissionError::Untrusted {
                server: issuer.server.clone(),
                user: issuer.username.clone(),
                host: issuer.host.clone(),
            })
        };
        Routing { forwarded, local }
    }

    /// Send `msg` once down every link whose subtree holds a server
    /// matching `mask`, skipping the arrival link and links lacking the
    /// command's capability.
    fn send_match_servs(
        &self,
        from_link: Option<&str>,
        mask: &str,
        msg: &Arc<PeerMessage>,
    ) -> Vec<Forward> {
        let capability = msg.command.capability();
        let mut forwarded = Vec::new();

        for link in self.links.values() {
            if from_link.is_some_and(|from| from.eq_ignore_ascii_case(&link.name)) {
                continue;
            }
            if !self.topology.subtree_matches(&link.name, mask) {
                continue;
            }
            if !link.capabilities.contains(capability) {
                debug!(
                    link = %link.name,
                    capability = capability.as_str(),
                    "Link lacks capability, not forwarding"
                );
                continue;
            }
            if link.send(msg.clone()) {
                forwarded.push(Forward {
                    link: link.name.clone(),
                    target: mask.to_string(),
                });
            }
        }
        forwarded
    }

    /// One copy per cluster block covering the command, addressed to the
    /// block's server mask.
    fn cluster_distribute(&self, template: &PeerMessage) -> Vec<Forward> {
        self.clusters
            .iter()
            .filter(|cluster| cluster.types.contains(template.command))
            .flat_map(|cluster| {
                let msg = Arc::new(template.retarget(&cluster.server));
                self.send_match_servs(None, &cluster.server, &msg)
            })
            .collect()
    }

    fn shared_find(&self, command: BanCommand, server: &str, user: &str, host: &str) -> bool {
        self.shared.iter().any(|shared| {
            shared.types.contains(command)
                && wildcard_match(&shared.server, server)
                && wildcard_match(&shared.user, user)
                && wildcard_match(&shared.host, host)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::capab::{Capability, CapabilitySet};
    use tokio::sync::mpsc;

    fn link(
        router: &mut PropagationRouter,
        name: &str,
        caps: &[Capability],
    ) -> mpsc::Receiver<Arc<PeerMessage>> {
        let (tx, rx) = mpsc::channel(16);
        router.add_link(LinkState::new(name, caps.iter().copied().collect(), tx));
        rx
    }

    fn oper() -> Issuer {
        Issuer {
            name: "alice".into(),
            username: "a".into(),
            host: "staff.example.net".into(),
            server: "local.example.net".into(),
            privileges: CommandSet::all(),
            service: false,
        }
    }

    fn kline_args() -> Vec<String> {
        vec!["0".into(), "*".into(), "bad*host".into(), "spam".into()]
    }

    #[test]
    fn targeted_command_goes_only_to_matching_capable_links() {
        let mut router = PropagationRouter::new("local.example.net");
        let mut hub = link(&mut router, "hub.example.net", &[Capability::Kln]);
        let mut old = link(&mut router, "old.example.net", &[]);
        let mut other = link(&mut router, "other.example.org", &[Capability::Kln]);
        router.introduce("leaf.example.net", "hub.example.net");

        let routing = router.route_local(&oper(), BanCommand::Kline, Some("*.example.net"), kline_args());
        assert_eq!(routing.local, LocalAction::Apply);
        assert_eq!(
            routing.forwarded,
            vec![Forward {
                link: "hub.example.net".into(),
                target: "*.example.net".into()
            }]
        );
        let msg = hub.try_recv().unwrap();
        assert_eq!(msg.params[0], "*.example.net");
        assert_eq!(msg.source, "alice!a@staff.example.net{local.example.net}");
        assert!(old.try_recv().is_err());
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn targeted_command_reaches_leaf_through_its_hub() {
        let mut router = PropagationRouter::new("local.example.net");
        let mut hub = link(&mut router, "hub.example.net", &[Capability::Kln]);
        router.introduce("leaf.example.org", "hub.example.net");

        let routing = router.route_local(&oper(), BanCommand::Kline, Some("leaf.example.org"), kline_args());
        assert_eq!(routing.local, LocalAction::NotAddressed);
        assert_eq!(routing.forwarded.len(), 1);
        assert!(hub.try_recv().is_ok());
    }

    #[test]
    fn untargeted_command_uses_cluster_blocks() {
        let mut router = PropagationRouter::new("local.example.net");
        let mut hub = link(&mut router, "hub.example.net", &[Capability::Kln, Capability::Cluster]);
        router.set_clusters(vec![
            ClusterEntry {
                server: "hub.*".into(),
                types: [BanCommand::Kline].into_iter().collect(),
            },
            ClusterEntry {
                server: "*".into(),
                types: [BanCommand::Xline].into_iter().collect(),
            },
        ]);

        let routing = router.route_local(&oper(), BanCommand::Kline, None, kline_args());
        assert_eq!(routing.local, LocalAction::Apply);
        assert_eq!(routing.forwarded.len(), 1);
        assert_eq!(hub.try_recv().unwrap().params[0], "hub.*");
        assert!(hub.try_recv().is_err());
    }

    #[test]
    fn no_cluster_means_local_only() {
        let mut router = PropagationRouter::new("local.example.net");
        let mut hub = link(&mut router, "hub.example.net", &[Capability::Kln]);
        let routing = router.route_local(&oper(), BanCommand::Kline, None, kline_args());
        assert_eq!(routing.local, LocalAction::Apply);
        assert!(routing.forwarded.is_empty());
        assert!(hub.try_recv().is_err());
    }

    #[test]
    fn remote_command_is_relayed_but_not_echoed() {
        let mut router = PropagationRouter::new("local.example.net");
        let mut hub = link(&mut router, "hub.example.net", &[Capability::Kln]);
        let mut leaf = link(&mut router, "leaf.example.net", &[Capability::Kln]);

        let issuer = Issuer::remote("bob", "b", "host", "hub.example.net");
        let mut params = vec!["*".to_string()];
        params.extend(kline_args());
        let msg = PeerMessage::new(&issuer.oper_name(), BanCommand::Kline, params);
        let routing = router.route_remote(&issuer, "HUB.example.net", msg);

        assert_eq!(routing.forwarded.len(), 1);
        assert_eq!(routing.forwarded[0].link, "leaf.example.net");
        assert!(hub.try_recv().is_err());
        assert!(leaf.try_recv().is_ok());
        assert!(matches!(routing.local, LocalAction::Untrusted(_)));
    }

    #[test]
    fn remote_command_trusted_by_shared_block_or_service() {
        let mut router = PropagationRouter::new("local.example.net");
        router.set_shared(vec![SharedEntry {
            server: "hub.*".into(),
            user: "*".into(),
            host: "*".into(),
            types: [BanCommand::Kline].into_iter().collect(),
        }]);

        let msg = |issuer: &Issuer, command| {
            PeerMessage::new(&issuer.oper_name(), command, vec!["local.*".into()])
        };

        let bob = Issuer::remote("bob", "b", "host", "hub.example.net");
        let routing = router.route_remote(&bob, "hub.example.net", msg(&bob, BanCommand::Kline));
        assert_eq!(routing.local, LocalAction::Apply);

        // Shared block does not cover DLINE
        let routing = router.route_remote(&bob, "hub.example.net", msg(&bob, BanCommand::Dline));
        assert!(matches!(routing.local, LocalAction::Untrusted(_)));

        let mut service = Issuer::remote("OperServ", "services", "services.example.net", "services.example.net");
        service.service = true;
        let routing = router.route_remote(&service, "hub.example.net", msg(&service, BanCommand::Dline));
        assert_eq!(routing.local, LocalAction::Apply);

        // Not addressed here
        let routing = router.route_remote(
            &service,
            "hub.example.net",
            PeerMessage::new("x", BanCommand::Dline, vec!["elsewhere.*".into()]),
        );
        assert_eq!(routing.local, LocalAction::NotAddressed);
    }

    #[test]
    fn removing_link_forgets_subtree() {
        let mut router = PropagationRouter::new("local.example.net");
        let _hub = link(&mut router, "hub.example.net", &[Capability::Kln]);
        router.introduce("leaf.example.net", "hub.example.net");
        assert!(router.remove_link("hub.example.net").is_some());
        assert!(router.topology().get("leaf.example.net").is_none());
        let routing = router.route_local(&oper(), BanCommand::Kline, Some("*"), kline_args());
        assert!(routing.forwarded.is_empty());
    }

    #[test]
    fn issuer_round_trips_through_source() {
        let issuer = Issuer::from_source("bob!b@staff.example.org{hub.example.org}");
        assert_eq!(issuer.name, "bob");
        assert_eq!(issuer.username, "b");
        assert_eq!(issuer.host, "staff.example.org");
        assert_eq!(issuer.server, "hub.example.org");
        assert_eq!(issuer.oper_name(), "bob!b@staff.example.org{hub.example.org}");

        let server = Issuer::from_source("hub.example.org");
        assert_eq!(server.server, "hub.example.org");
        assert_eq!(server.oper_name(), "hub.example.org");
    }

    #[test]
    fn capability_set_from_slice() {
        let caps: CapabilitySet = [Capability::Dln].into_iter().collect();
        assert!(caps.contains(Capability::Dln));
    }
}
