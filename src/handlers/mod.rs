//! Ban command handlers.
//!
//! This module contains the [`Handler`] trait and the [`Registry`] that
//! dispatches operator commands and commands relayed by peer servers to the
//! appropriate handler.
//!
//! Operator commands return a [`HandlerResult`]; the error, if any, is shown
//! only to the issuing operator. Relayed commands never produce an error for
//! the peer: a malformed one is dropped and any other failure is logged.

mod bans;
pub mod stats;

pub use bans::{
    BanConfig, DlineConfig, DlineHandler, GenericBanAddHandler, GenericBanRemoveHandler,
    KlineConfig, KlineHandler, ResvConfig, ResvHandler, UndlineHandler, UnklineHandler,
    UnresvHandler, UnxlineHandler, XlineConfig, XlineHandler,
};
pub use bans::common::{Aline, parse_aline, parse_wire_duration};

use crate::error::BanError;
use crate::security::Timestamp;
use crate::state::Matrix;
use crate::sync::{BanCommand, Forward, Issuer, PeerMessage};
use crate::telemetry::{CommandTimer, spans};
use std::collections::HashMap;

/// Handler context passed to each command handler.
pub struct Context<'a> {
    pub matrix: &'a mut Matrix,
    /// Who issued the command.
    pub issuer: &'a Issuer,
    /// Current time, fixed for the duration of the command.
    pub now: Timestamp,
}

/// What a ban command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub command: BanCommand,
    /// The mask, in display form.
    pub mask: String,
    /// Whether the command took effect on this server.
    pub applied: bool,
    /// Copies sent to peers.
    pub forwarded: Vec<Forward>,
    /// Local connections disconnected as a result.
    pub disconnected: usize,
}

impl CommandOutcome {
    pub fn new(command: BanCommand, mask: String, forwarded: Vec<Forward>) -> Self {
        Self {
            command,
            mask,
            applied: false,
            forwarded,
            disconnected: 0,
        }
    }
}

pub type HandlerResult = Result<CommandOutcome, BanError>;

/// A ban command handler.
pub trait Handler {
    /// Handle a command issued by a local operator. `args` follow the
    /// command name, trailing parameter last.
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult;

    /// Handle a command relayed by the peer `arrived_on`. Returns `None` if
    /// the command was malformed and dropped without being relayed.
    fn handle_remote(
        &self,
        ctx: &mut Context<'_>,
        arrived_on: &str,
        msg: PeerMessage,
    ) -> Option<CommandOutcome>;
}

/// Registry of command handlers.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();
        bans::register(&mut handlers);
        Self { handlers }
    }

    /// Run an operator command. Returns `None` for an unknown command.
    pub fn dispatch(
        &self,
        ctx: &mut Context<'_>,
        command: &str,
        args: &[&str],
    ) -> Option<HandlerResult> {
        let command = BanCommand::from_name(command)?;
        let handler = self.handlers.get(command.name())?;

        let source = ctx.issuer.oper_name();
        let _span = spans::command(command.name(), &source, None).entered();
        let _timer = CommandTimer::new(command.name());

        let result = handler.handle(ctx, args);
        if let Err(e) = &result {
            tracing::debug!(error = %e, code = e.error_code(), "Ban command rejected");
            crate::metrics::record_command_error(command.name(), e.error_code());
        }
        Some(result)
    }

    /// Run a command relayed by a peer.
    pub fn dispatch_remote(
        &self,
        ctx: &mut Context<'_>,
        arrived_on: &str,
        msg: PeerMessage,
    ) -> Option<CommandOutcome> {
        let command = msg.command;
        let handler = self.handlers.get(command.name())?;

        let _peer = spans::peer(arrived_on).entered();
        let _span = spans::command(command.name(), &msg.source, Some(msg.target())).entered();
        let _timer = CommandTimer::new(command.name());

        handler.handle_remote(ctx, arrived_on, msg)
    }
}

/// Split a command line into the command name and its arguments. A
/// parameter starting with `:` takes the rest of the line.
pub fn split_line(line: &str) -> Option<(&str, Vec<&str>)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, trailing) = match line.find(" :") {
        Some(pos) => (&line[..pos], Some(&line[pos + 2..])),
        None => (line, None),
    };

    let mut words = head.split_ascii_whitespace();
    let command = words.next()?;
    let mut args: Vec<&str> = words.collect();
    args.extend(trailing);
    Some((command, args))
}
