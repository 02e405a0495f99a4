//! Local connections as seen by ban enforcement.
//!
//! Connections start out unregistered (`unknown`) and move to the `local`
//! collection once registration completes. Disconnecting a connection marks
//! it dead and queues a [`Disconnect`] for the connection layer to flush;
//! sessions attached to it (bouncer-style multiclient) are torn down with it
//! immediately.
//!
//! ```text
//! accept() ──> unknown ──register()──> local
//!                 │                      │
//!                 └──── exit_client() ───┴──> dead ──> reap()
//! ```

use crate::security::UserContext;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Connection identifier, unique for the life of the process.
pub type ConnId = u64;

/// Registration phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Unknown,
    Registered,
}

/// A local connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnId,
    pub phase: Phase,
    pub nick: String,
    pub username: String,
    /// Resolved hostname; the textual address until DNS completes.
    pub host: String,
    pub sockhost: String,
    pub ip: IpAddr,
    pub realname: String,
    /// Exempt from K-lines and D-lines.
    pub exempt_kline: bool,
    /// Exempt from X-lines.
    pub exempt_xline: bool,
    /// Scheduled for disconnection.
    pub dead: bool,
    /// Sessions torn down together with this connection.
    pub attached: Vec<ConnId>,
}

impl Connection {
    fn new(id: ConnId, ip: IpAddr) -> Self {
        let sockhost = ip.to_string();
        Self {
            id,
            phase: Phase::Unknown,
            nick: String::new(),
            username: String::new(),
            host: sockhost.clone(),
            sockhost,
            ip,
            realname: String::new(),
            exempt_kline: false,
            exempt_xline: false,
            dead: false,
            attached: Vec::new(),
        }
    }

    /// Identity used for ban matching.
    pub fn user_context(&self) -> UserContext<'_> {
        UserContext {
            nickname: &self.nick,
            username: &self.username,
            hostname: &self.host,
            sockhost: &self.sockhost,
            ip: Some(self.ip),
            realname: &self.realname,
        }
    }

    /// `nick!user@host` for notices.
    pub fn mask(&self) -> String {
        let nick = if self.nick.is_empty() { "*" } else { &self.nick };
        format!("{}!{}@{}", nick, self.username, self.host)
    }
}

/// A queued disconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub id: ConnId,
    pub mask: String,
    pub reason: String,
}

/// All local connections.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    unknown: BTreeMap<ConnId, Connection>,
    local: BTreeMap<ConnId, Connection>,
    exits: Vec<Disconnect>,
    next_id: ConnId,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted socket.
    pub fn accept(&mut self, ip: IpAddr) -> ConnId {
        self.next_id += 1;
        let id = self.next_id;
        self.unknown.insert(id, Connection::new(id, ip));
        id
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.unknown.get(&id).or_else(|| self.local.get(&id))
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        match self.unknown.get_mut(&id) {
            Some(conn) => Some(conn),
            None => self.local.get_mut(&id),
        }
    }

    /// Move a connection from `unknown` to `local`.
    pub fn register(&mut self, id: ConnId) -> bool {
        match self.unknown.remove(&id) {
            Some(mut conn) => {
                conn.phase = Phase::Registered;
                self.local.insert(id, conn);
                true
            }
            None => false,
        }
    }

    /// Registered connection using `nick` (case-insensitive).
    pub fn find_by_nick(&self, nick: &str) -> Option<&Connection> {
        self.local
            .values()
            .find(|c| !c.dead && c.nick.eq_ignore_ascii_case(nick))
    }

    /// Ids of unregistered connections, in accept order.
    pub fn unknown_ids(&self) -> Vec<ConnId> {
        self.unknown.keys().copied().collect()
    }

    /// Ids of registered connections, in accept order.
    pub fn local_ids(&self) -> Vec<ConnId> {
        self.local.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.unknown.len() + self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unknown.is_empty() && self.local.is_empty()
    }

    /// Schedule a connection for disconnection.
    ///
    /// Returns `false` if it is unknown or already dead. Attached sessions
    /// are destroyed immediately.
    pub fn exit_client(&mut self, id: ConnId, reason: &str) -> bool {
        let Some(conn) = self.get_mut(id) else {
            return false;
        };
        if conn.dead {
            return false;
        }
        conn.dead = true;
        let attached = std::mem::take(&mut conn.attached);
        let mask = conn.mask();
        self.exits.push(Disconnect {
            id,
            mask,
            reason: reason.to_string(),
        });

        for session in attached {
            if let Some(conn) = self.destroy(session) {
                self.exits.push(Disconnect {
                    id: session,
                    mask: conn.mask(),
                    reason: reason.to_string(),
                });
            }
        }
        true
    }

    /// Drop a connection without queueing anything.
    pub fn destroy(&mut self, id: ConnId) -> Option<Connection> {
        self.unknown.remove(&id).or_else(|| self.local.remove(&id))
    }

    /// Take the queued disconnections.
    pub fn drain_exits(&mut self) -> Vec<Disconnect> {
        std::mem::take(&mut self.exits)
    }

    /// Remove dead connections once their disconnects have been flushed.
    pub fn reap(&mut self) -> usize {
        let before = self.len();
        self.unknown.retain(|_, c| !c.dead);
        self.local.retain(|_, c| !c.dead);
        before - self.len()
    }
}
