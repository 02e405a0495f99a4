//! Shared ban utilities.
//!
//! Argument parsing and the apply/remove steps common to every ban kind.

use super::super::Context;
use crate::error::{BanError, PermissionError, ValidationError};
use crate::metrics;
use crate::security::{BanMatch, BanPattern, BanRecord, enforce};
use crate::sync::{BanCommand, Forward, Issuer, PeerMessage};
use tracing::{debug, info};

/// Longest temporary ban an operator can set, in minutes (one year).
pub const MAX_TEMP_MINUTES: u64 = 525_600;

/// Reason used when an operator gives none.
pub const DEFAULT_REASON: &str = "No reason";

/// Parsed operator arguments of a ban command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aline<'a> {
    /// Duration in seconds; 0 is permanent.
    pub duration: u64,
    pub mask: &'a str,
    /// Server mask given with `ON`.
    pub target: Option<&'a str>,
    /// Empty for removals.
    pub reason: &'a str,
}

/// Parse `[minutes] mask [ON server] [reason]`.
///
/// Removals (`with_reason` false) take neither a duration nor a reason. A
/// missing reason defaults to [`DEFAULT_REASON`]; an explicitly empty one is
/// rejected.
pub fn parse_aline<'a>(args: &[&'a str], with_reason: bool) -> Result<Aline<'a>, ValidationError> {
    let mut args = args.iter().copied().peekable();

    let mut duration = 0;
    if with_reason && args.peek().is_some_and(|a| is_duration(a)) {
        duration = args.next().map_or(0, minutes_to_secs);
    }

    let mask = args.next().ok_or(ValidationError::BadArgumentCount)?;
    if mask.is_empty() {
        return Err(ValidationError::EmptyMask);
    }

    let mut target = None;
    if args.peek().is_some_and(|a| a.eq_ignore_ascii_case("ON")) {
        args.next();
        let server = args
            .next()
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::BadArgumentCount)?;
        target = Some(server);
    }

    let reason = if with_reason {
        match args.next() {
            None => DEFAULT_REASON,
            Some("") => return Err(ValidationError::EmptyReason),
            Some(reason) => reason,
        }
    } else {
        ""
    };

    Ok(Aline {
        duration,
        mask,
        target,
        reason,
    })
}

fn is_duration(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

fn minutes_to_secs(token: &str) -> u64 {
    token
        .parse::<u64>()
        .unwrap_or(u64::MAX)
        .min(MAX_TEMP_MINUTES)
        * 60
}

/// Parse a duration in seconds from a relayed command. Leading digits are
/// used; anything else yields 0 (permanent). Capped at
/// [`MAX_TEMP_MINUTES`] like operator input.
pub fn parse_wire_duration(text: &str) -> u64 {
    let text = text.trim_start();
    let text = text.strip_prefix('+').unwrap_or(text);
    let end = text
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(text.len());
    if end == 0 {
        return 0;
    }
    text[..end]
        .parse::<u64>()
        .unwrap_or(u64::MAX)
        .min(MAX_TEMP_MINUTES * 60)
}

/// The target of a K-line as typed by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserHost<'a> {
    Mask { user: &'a str, host: &'a str },
    Nick(&'a str),
}

/// Split `user@host`. A bare host (containing `.`, `:` or a wildcard)
/// means `*@host`; anything else is a nickname.
pub fn split_user_host(mask: &str) -> UserHost<'_> {
    if let Some((user, host)) = mask.split_once('@') {
        let user = if user.is_empty() { "*" } else { user };
        let host = if host.is_empty() { "*" } else { host };
        UserHost::Mask { user, host }
    } else if mask.contains(['.', ':', '*', '?']) {
        UserHost::Mask {
            user: "*",
            host: mask,
        }
    } else {
        UserHost::Nick(mask)
    }
}

/// Fail unless the issuer holds the privilege for `command`.
pub fn require_privilege(issuer: &Issuer, command: BanCommand) -> Result<(), PermissionError> {
    if issuer.privileges.contains(command) {
        Ok(())
    } else {
        Err(PermissionError::NoPrivilege(command.name()))
    }
}

/// Does a relayed command have exactly the documented argument count and a
/// non-empty last argument?
pub fn is_well_formed(msg: &PeerMessage) -> bool {
    msg.params.len() == msg.command.wire_args() && msg.params.last().is_some_and(|p| !p.is_empty())
}

pub fn record_forwards(forwarded: &[Forward]) {
    for forward in forwarded {
        metrics::record_forwarded(&forward.link);
    }
}

/// Store a new ban and disconnect the local connections it matches.
///
/// Returns the number of connections disconnected.
pub fn apply_ban(
    ctx: &mut Context<'_>,
    pattern: BanPattern,
    reason: &str,
    duration: u64,
) -> Result<usize, BanError> {
    let record = BanRecord::new(pattern, reason, ctx.now, duration);
    let kind = record.kind();
    let id = ctx.matrix.bans.add(record).inspect_err(|e| {
        debug!(kind = kind.name(), error = %e, "Ban not added");
    })?;

    let Some(record) = ctx.matrix.bans.get(id) else {
        return Ok(0);
    };
    info!(
        oper = %ctx.issuer.oper_name(),
        kind = kind.name(),
        mask = %record.describe(),
        reason = %record.reason,
        duration,
        ban = %id,
        "Ban added"
    );
    metrics::record_ban_added(kind);

    let disconnected = enforce::disconnect_matching_ban(&mut ctx.matrix.clients, record);
    metrics::record_enforced(kind, disconnected);
    Ok(disconnected)
}

/// Remove the persisted ban with exactly this pattern.
pub fn remove_ban(ctx: &mut Context<'_>, pattern: &BanPattern) -> Result<(), BanError> {
    let record = ctx.matrix.bans.remove_by_pattern(pattern)?;
    info!(
        oper = %ctx.issuer.oper_name(),
        kind = record.kind().name(),
        mask = %record.describe(),
        "Ban removed"
    );
    metrics::record_ban_removed(record.kind());
    Ok(())
}
