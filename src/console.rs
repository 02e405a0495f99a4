//! Operator console.
//!
//! Interprets one line at a time from the process's standard input and
//! produces the reply lines for it. Besides the ban commands it accepts:
//!
//! - `OPER <name>`: act as the named operator block
//! - `CLIENT <nick> <user> <host> <ip> :<realname>`: connect a local client
//! - `PEER <link> <source> <command> <args...>`: a command relayed by a peer
//! - `STATS <letter>`, `REHASH`, `METRICS`

use crate::config::{self, Config};
use crate::event::EventQueue;
use crate::handlers::{CommandOutcome, Context, Registry, split_line, stats};
use crate::security::Timestamp;
use crate::state::{EXPIRY_EVENT, Matrix, expiry_event};
use crate::sync::{BanCommand, CommandSet, Issuer, PeerMessage};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};

/// Console state: the server core, its event queue and the current
/// operator identity.
pub struct Console {
    pub matrix: Matrix,
    pub events: EventQueue<Matrix>,
    registry: Registry,
    issuer: Issuer,
    config_path: PathBuf,
    last_tick: Option<Timestamp>,
}

impl Console {
    pub fn new(matrix: Matrix, events: EventQueue<Matrix>, config_path: PathBuf) -> Self {
        let issuer = anonymous(&matrix.server_info.name);
        Self {
            matrix,
            events,
            registry: Registry::new(),
            issuer,
            config_path,
            last_tick: None,
        }
    }

    /// Advance the clock: correct for a backwards jump, then fire due
    /// events.
    pub fn tick(&mut self, now: Timestamp) -> usize {
        if let Some(last) = self.last_tick
            && now < last
        {
            warn!(by = last - now, "Clock went backwards, rescheduling events");
            self.events.set_back(last - now);
        }
        self.last_tick = Some(now);
        let ran = self.events.run(&mut self.matrix, now);
        self.reap();
        ran
    }

    /// Run one console line and return the replies.
    pub fn execute(&mut self, line: &str, now: Timestamp) -> Vec<String> {
        let Some((command, args)) = split_line(line) else {
            return Vec::new();
        };

        let mut replies = match command.to_ascii_uppercase().as_str() {
            "OPER" => self.oper(&args),
            "CLIENT" => self.client(&args),
            "PEER" => self.peer(&args, now),
            "STATS" => self.stats(&args, now),
            "REHASH" => self.rehash(now),
            "METRICS" => crate::metrics::gather_metrics()
                .lines()
                .map(str::to_string)
                .collect(),
            _ => self.ban_command(command, &args, now),
        };
        replies.extend(self.reap());
        replies
    }

    fn oper(&mut self, args: &[&str]) -> Vec<String> {
        let Some(name) = args.first() else {
            return vec!["ERR bad_argument_count OPER <name>".to_string()];
        };
        match self.matrix.find_oper(name) {
            Some(block) => {
                self.issuer = Issuer::from_oper(block, &self.matrix.server_info.name);
                info!(oper = %self.issuer.oper_name(), "Operator selected");
                vec![format!("OK OPER {}", self.issuer.name)]
            }
            None => vec![format!("ERR no_such_oper {name}")],
        }
    }

    fn client(&mut self, args: &[&str]) -> Vec<String> {
        let [nick, user, host, ip, rest @ ..] = args else {
            return vec!["ERR bad_argument_count CLIENT <nick> <user> <host> <ip> :<realname>"
                .to_string()];
        };
        let Ok(addr) = ip.parse::<IpAddr>() else {
            return vec![format!("ERR malformed_mask {ip}")];
        };

        let id = match self.matrix.accept(addr) {
            Ok(id) => id,
            Err(hit) => return vec![format!("BANNED {nick} :{}", hit.reason)],
        };
        if let Some(conn) = self.matrix.clients.get_mut(id) {
            conn.nick = nick.to_string();
            conn.username = user.to_string();
            conn.host = host.to_string();
            conn.realname = rest.first().copied().unwrap_or_default().to_string();
        }
        match self.matrix.register(id) {
            Ok(()) => vec![format!("OK CLIENT {nick} {id}")],
            Err(hit) => vec![format!("BANNED {nick} :{}", hit.reason)],
        }
    }

    fn peer(&mut self, args: &[&str], now: Timestamp) -> Vec<String> {
        let [link, source, name, params @ ..] = args else {
            return vec!["ERR bad_argument_count PEER <link> <source> <command> ...".to_string()];
        };
        let Some(command) = BanCommand::from_name(name) else {
            return vec![format!("ERR unknown_command {name}")];
        };

        let msg = PeerMessage::new(
            source,
            command,
            params.iter().map(|p| p.to_string()).collect(),
        );
        let issuer = self.matrix.remote_issuer(source);
        let mut ctx = Context {
            matrix: &mut self.matrix,
            issuer: &issuer,
            now,
        };
        match self.registry.dispatch_remote(&mut ctx, link, msg) {
            Some(outcome) => vec![format_outcome(&outcome)],
            None => vec![format!("DROPPED {}", command.name())],
        }
    }

    fn stats(&self, args: &[&str], now: Timestamp) -> Vec<String> {
        let letter = args.first().and_then(|a| a.chars().next()).unwrap_or('?');
        let mut replies: Vec<String> = if letter.eq_ignore_ascii_case(&'E') {
            stats::events(&self.events, now)
                .into_iter()
                .map(|e| format!("STATS E {} {}", e.name.replace(' ', "_"), e.next_in))
                .collect()
        } else {
            stats::report(&self.matrix.bans, letter, now)
                .into_iter()
                .map(|entry| match entry.expires_in {
                    Some(left) => format!(
                        "STATS {} {} {} :{}",
                        entry.letter, entry.mask, left, entry.reason
                    ),
                    None => format!("STATS {} {} :{}", entry.letter, entry.mask, entry.reason),
                })
                .collect()
        };
        replies.push(format!("END STATS {letter}"));
        replies
    }

    fn rehash(&mut self, now: Timestamp) -> Vec<String> {
        let config = match Config::load(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %self.config_path.display(), error = %e, "Rehash failed");
                return vec![format!("ERR rehash {e}")];
            }
        };
        if let Err(errors) = config::validation::validate(&config) {
            for e in &errors {
                warn!(error = %e, "Rehash rejected");
            }
            return errors.iter().map(|e| format!("ERR rehash {e}")).collect();
        }

        match self.matrix.rehash(&config, now) {
            Ok(loaded) => {
                self.events.delete(EXPIRY_EVENT);
                self.events.add(expiry_event(&self.matrix.limits), now);
                if !self.issuer.name.is_empty() {
                    self.issuer = match self.matrix.find_oper(&self.issuer.name) {
                        Some(block) => Issuer::from_oper(block, &self.matrix.server_info.name),
                        None => {
                            warn!(
                                oper = %self.issuer.name,
                                "Operator block removed, privileges revoked"
                            );
                            anonymous(&self.matrix.server_info.name)
                        }
                    };
                }
                vec![format!("OK REHASH {loaded}")]
            }
            Err(e) => vec![format!("ERR {} {e}", e.error_code())],
        }
    }

    fn ban_command(&mut self, command: &str, args: &[&str], now: Timestamp) -> Vec<String> {
        let mut ctx = Context {
            matrix: &mut self.matrix,
            issuer: &self.issuer,
            now,
        };
        match self.registry.dispatch(&mut ctx, command, args) {
            Some(Ok(outcome)) => vec![format_outcome(&outcome)],
            Some(Err(e)) => vec![format!("ERR {} {e}", e.error_code())],
            None => vec![format!("ERR unknown_command {command}")],
        }
    }

    /// Report and tear down connections disconnected since the last call.
    fn reap(&mut self) -> Vec<String> {
        let exits = self.matrix.clients.drain_exits();
        self.matrix.clients.reap();
        exits
            .into_iter()
            .map(|exit| format!("EXIT {} :{}", exit.mask, exit.reason))
            .collect()
    }
}

/// The identity used before any `OPER`: no privileges.
fn anonymous(server: &str) -> Issuer {
    Issuer {
        name: String::new(),
        username: String::new(),
        host: String::new(),
        server: server.to_string(),
        privileges: CommandSet::default(),
        service: false,
    }
}

fn format_outcome(outcome: &CommandOutcome) -> String {
    let links: Vec<&str> = outcome.forwarded.iter().map(|f| f.link.as_str()).collect();
    format!(
        "OK {} {} applied={} forwarded=[{}] disconnected={}",
        outcome.command,
        outcome.mask,
        if outcome.applied { "yes" } else { "no" },
        links.join(","),
        outcome.disconnected
    )
}
