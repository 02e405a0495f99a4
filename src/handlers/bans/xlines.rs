//! X-line ban command handlers.
//!
//! Uses a trait-based generic handler system: one add handler and one
//! remove handler, parameterized by a [`BanConfig`] per ban kind.
//!
//! A locally issued command is checked for privilege, parsed, resolved and
//! validated before anything is sent to a peer. It is then routed (to the
//! servers matching `ON <mask>`, or to the cluster blocks) and applied here
//! if addressed here. A relayed command is relayed on before local policy
//! is consulted, so a rejection here never stops propagation.

use super::common::{
    UserHost, apply_ban, is_well_formed, parse_aline, parse_wire_duration, record_forwards,
    remove_ban, require_privilege, split_user_host,
};
use crate::config::BanLimitsConfig;
use crate::error::{BanError, ValidationError};
use crate::handlers::{CommandOutcome, Context, Handler, HandlerResult};
use crate::metrics;
use crate::security::hostmask::{AddressFamily, valid_wild_card, valid_wild_card_simple};
use crate::security::{BanKind, BanMatch, BanPattern, HostMask};
use crate::state::Matrix;
use crate::sync::{BanCommand, LocalAction, PeerMessage};
use tracing::debug;

// -----------------------------------------------------------------------------
// BanConfig Trait
// -----------------------------------------------------------------------------

/// Per-kind behavior of the generic ban handlers.
pub trait BanConfig: 'static {
    fn kind(&self) -> BanKind;

    fn add_command(&self) -> BanCommand;

    fn remove_command(&self) -> BanCommand;

    /// Parse an operator-supplied mask, resolving a nickname through the
    /// local connections where the kind allows it.
    fn resolve(&self, matrix: &Matrix, mask: &str) -> Result<BanPattern, ValidationError>;

    /// Reject a mask broader than the configured limits. Not applied to
    /// bans from the trusted service.
    fn check_limits(
        &self,
        limits: &BanLimitsConfig,
        pattern: &BanPattern,
    ) -> Result<(), ValidationError>;

    /// Wire arguments of an add command, after the target.
    fn encode_add(&self, pattern: &BanPattern, duration: u64, reason: &str) -> Vec<String>;

    /// Decode the wire arguments of an add command, after the target.
    fn decode_add(&self, args: &[String]) -> Result<(BanPattern, u64, String), ValidationError>;
}

fn too_broad(pattern: &BanPattern, required: usize) -> ValidationError {
    ValidationError::TooFewNonWildcard {
        mask: pattern.describe(),
        required,
    }
}

fn check_cidr(mask: &HostMask, min4: u8, min6: u8) -> Result<(), ValidationError> {
    let (Some(family), Some(bits)) = (mask.family(), mask.prefix_len()) else {
        return Ok(());
    };
    let required = match family {
        AddressFamily::V4 => min4,
        AddressFamily::V6 => min6,
    };
    if bits < required {
        return Err(ValidationError::CidrTooWide {
            mask: mask.to_string(),
            required,
        });
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Generic Handlers
// -----------------------------------------------------------------------------

/// Generic handler for ban add commands.
pub struct GenericBanAddHandler<C: BanConfig> {
    config: C,
}

impl<C: BanConfig> GenericBanAddHandler<C> {
    pub const fn new(config: C) -> Self {
        Self { config }
    }

    fn validate(&self, ctx: &Context<'_>, pattern: &BanPattern) -> Result<(), ValidationError> {
        if ctx.issuer.service {
            return Ok(());
        }
        self.config.check_limits(&ctx.matrix.limits, pattern)
    }
}

impl<C: BanConfig> Handler for GenericBanAddHandler<C> {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let command = self.config.add_command();
        require_privilege(ctx.issuer, command)?;

        let aline = parse_aline(args, true)?;
        let pattern = self.config.resolve(ctx.matrix, aline.mask)?;
        self.validate(ctx, &pattern)?;

        let wire = self
            .config
            .encode_add(&pattern, aline.duration, aline.reason);
        let routing = ctx
            .matrix
            .router
            .route_local(ctx.issuer, command, aline.target, wire);
        record_forwards(&routing.forwarded);

        let mut outcome = CommandOutcome::new(command, pattern.describe(), routing.forwarded);
        if routing.local == LocalAction::Apply {
            outcome.disconnected = apply_ban(ctx, pattern, aline.reason, aline.duration)?;
            outcome.applied = true;
        }
        Ok(outcome)
    }

    fn handle_remote(
        &self,
        ctx: &mut Context<'_>,
        arrived_on: &str,
        msg: PeerMessage,
    ) -> Option<CommandOutcome> {
        let command = self.config.add_command();
        if !is_well_formed(&msg) {
            debug!(link = %arrived_on, params = msg.params.len(), "Dropping malformed relayed ban");
            metrics::record_peer_command(command.name(), "dropped");
            return None;
        }

        let decoded = self.config.decode_add(&msg.params[1..]);
        let mask = match &decoded {
            Ok((pattern, _, _)) => pattern.describe(),
            Err(_) => msg.params[1..msg.params.len() - 1].join(" "),
        };

        let routing = ctx.matrix.router.route_remote(ctx.issuer, arrived_on, msg);
        record_forwards(&routing.forwarded);
        let mut outcome = CommandOutcome::new(command, mask, routing.forwarded);
        if !should_apply(command, &routing.local) {
            return Some(outcome);
        }

        let result = decoded.map_err(BanError::from).and_then(|(pattern, duration, reason)| {
            self.validate(ctx, &pattern)?;
            apply_ban(ctx, pattern, &reason, duration)
        });
        match result {
            Ok(disconnected) => {
                outcome.applied = true;
                outcome.disconnected = disconnected;
                metrics::record_peer_command(command.name(), "applied");
            }
            Err(e) => {
                debug!(error = %e, code = e.error_code(), "Relayed ban rejected");
                metrics::record_peer_command(command.name(), "rejected");
            }
        }
        Some(outcome)
    }
}

/// Generic handler for ban remove commands.
pub struct GenericBanRemoveHandler<C: BanConfig> {
    config: C,
}

impl<C: BanConfig> GenericBanRemoveHandler<C> {
    pub const fn new(config: C) -> Self {
        Self { config }
    }
}

impl<C: BanConfig> Handler for GenericBanRemoveHandler<C> {
    fn handle(&self, ctx: &mut Context<'_>, args: &[&str]) -> HandlerResult {
        let command = self.config.remove_command();
        require_privilege(ctx.issuer, command)?;

        let aline = parse_aline(args, false)?;
        let pattern = self.config.resolve(ctx.matrix, aline.mask)?;

        let routing = ctx
            .matrix
            .router
            .route_local(ctx.issuer, command, aline.target, pattern.fields());
        record_forwards(&routing.forwarded);

        let mut outcome = CommandOutcome::new(command, pattern.describe(), routing.forwarded);
        if routing.local == LocalAction::Apply {
            remove_ban(ctx, &pattern)?;
            outcome.applied = true;
        }
        Ok(outcome)
    }

    fn handle_remote(
        &self,
        ctx: &mut Context<'_>,
        arrived_on: &str,
        msg: PeerMessage,
    ) -> Option<CommandOutcome> {
        let command = self.config.remove_command();
        if !is_well_formed(&msg) {
            debug!(link = %arrived_on, params = msg.params.len(), "Dropping malformed relayed unban");
            metrics::record_peer_command(command.name(), "dropped");
            return None;
        }

        let decoded = BanPattern::from_fields(self.config.kind(), &msg.params[1..]);
        let mask = match &decoded {
            Ok(pattern) => pattern.describe(),
            Err(_) => msg.params[1..].join("@"),
        };

        let routing = ctx.matrix.router.route_remote(ctx.issuer, arrived_on, msg);
        record_forwards(&routing.forwarded);
        let mut outcome = CommandOutcome::new(command, mask, routing.forwarded);
        if !should_apply(command, &routing.local) {
            return Some(outcome);
        }

        match decoded
            .map_err(BanError::from)
            .and_then(|pattern| remove_ban(ctx, &pattern))
        {
            Ok(()) => {
                outcome.applied = true;
                metrics::record_peer_command(command.name(), "applied");
            }
            Err(e) => {
                debug!(error = %e, code = e.error_code(), "Relayed unban rejected");
                metrics::record_peer_command(command.name(), "rejected");
            }
        }
        Some(outcome)
    }
}

fn should_apply(command: BanCommand, local: &LocalAction) -> bool {
    match local {
        LocalAction::Apply => true,
        LocalAction::NotAddressed => {
            metrics::record_peer_command(command.name(), "not_addressed");
            false
        }
        LocalAction::Untrusted(_) => {
            metrics::record_peer_command(command.name(), "untrusted");
            false
        }
    }
}

// -----------------------------------------------------------------------------
// K-line Config
// -----------------------------------------------------------------------------

/// K-line (user@host ban) configuration.
pub struct KlineConfig;

impl BanConfig for KlineConfig {
    fn kind(&self) -> BanKind {
        BanKind::Kline
    }

    fn add_command(&self) -> BanCommand {
        BanCommand::Kline
    }

    fn remove_command(&self) -> BanCommand {
        BanCommand::Unkline
    }

    fn resolve(&self, matrix: &Matrix, mask: &str) -> Result<BanPattern, ValidationError> {
        match split_user_host(mask) {
            UserHost::Mask { user, host } => BanPattern::kline(user, host),
            UserHost::Nick(nick) => {
                let conn = matrix
                    .clients
                    .find_by_nick(nick)
                    .ok_or_else(|| ValidationError::NoSuchNick(nick.to_string()))?;
                if conn.exempt_kline {
                    return Err(ValidationError::Exempt(conn.nick.clone()));
                }
                BanPattern::kline("*", &conn.host)
            }
        }
    }

    fn check_limits(
        &self,
        limits: &BanLimitsConfig,
        pattern: &BanPattern,
    ) -> Result<(), ValidationError> {
        let BanPattern::Kline(kline) = pattern else {
            return Ok(());
        };
        let host = kline.host.to_string();
        if !valid_wild_card(limits.min_nonwildcard, &[&kline.user, &host]) {
            return Err(too_broad(pattern, limits.min_nonwildcard));
        }
        check_cidr(&kline.host, limits.kline_min_cidr, limits.kline_min_cidr6)
    }

    fn encode_add(&self, pattern: &BanPattern, duration: u64, reason: &str) -> Vec<String> {
        let mut args = vec![duration.to_string()];
        args.extend(pattern.fields());
        args.push(reason.to_string());
        args
    }

    fn decode_add(&self, args: &[String]) -> Result<(BanPattern, u64, String), ValidationError> {
        let [duration, user, host, reason] = args else {
            return Err(ValidationError::BadArgumentCount);
        };
        Ok((
            BanPattern::kline(user, host)?,
            parse_wire_duration(duration),
            reason.clone(),
        ))
    }
}

// -----------------------------------------------------------------------------
// D-line Config
// -----------------------------------------------------------------------------

/// D-line (IP/CIDR ban) configuration.
pub struct DlineConfig;

impl BanConfig for DlineConfig {
    fn kind(&self) -> BanKind {
        BanKind::Dline
    }

    fn add_command(&self) -> BanCommand {
        BanCommand::Dline
    }

    fn remove_command(&self) -> BanCommand {
        BanCommand::Undline
    }

    fn resolve(&self, matrix: &Matrix, mask: &str) -> Result<BanPattern, ValidationError> {
        if let HostMask::Cidr(_) = HostMask::parse(mask)? {
            return BanPattern::dline(mask);
        }
        if mask.contains(['.', ':', '/', '*', '?', '@']) {
            return Err(ValidationError::NotAnAddress(mask.to_string()));
        }

        let conn = matrix
            .clients
            .find_by_nick(mask)
            .ok_or_else(|| ValidationError::NoSuchNick(mask.to_string()))?;
        if conn.exempt_kline {
            return Err(ValidationError::Exempt(conn.nick.clone()));
        }
        BanPattern::dline(&conn.ip.to_string())
    }

    fn check_limits(
        &self,
        limits: &BanLimitsConfig,
        pattern: &BanPattern,
    ) -> Result<(), ValidationError> {
        let BanPattern::Dline(dline) = pattern else {
            return Ok(());
        };
        if !valid_wild_card(limits.min_nonwildcard, &[&dline.describe()]) {
            return Err(too_broad(pattern, limits.min_nonwildcard));
        }
        check_cidr(
            &HostMask::Cidr(dline.net),
            limits.dline_min_cidr,
            limits.dline_min_cidr6,
        )
    }

    fn encode_add(&self, pattern: &BanPattern, duration: u64, reason: &str) -> Vec<String> {
        let mut args = vec![duration.to_string()];
        args.extend(pattern.fields());
        args.push(reason.to_string());
        args
    }

    fn decode_add(&self, args: &[String]) -> Result<(BanPattern, u64, String), ValidationError> {
        let [duration, address, reason] = args else {
            return Err(ValidationError::BadArgumentCount);
        };
        Ok((
            BanPattern::dline(address)?,
            parse_wire_duration(duration),
            reason.clone(),
        ))
    }
}

// -----------------------------------------------------------------------------
// X-line Config
// -----------------------------------------------------------------------------

/// X-line (realname ban) configuration.
pub struct XlineConfig;

impl BanConfig for XlineConfig {
    fn kind(&self) -> BanKind {
        BanKind::Xline
    }

    fn add_command(&self) -> BanCommand {
        BanCommand::Xline
    }

    fn remove_command(&self) -> BanCommand {
        BanCommand::Unxline
    }

    fn resolve(&self, _matrix: &Matrix, mask: &str) -> Result<BanPattern, ValidationError> {
        BanPattern::xline(mask)
    }

    fn check_limits(
        &self,
        limits: &BanLimitsConfig,
        pattern: &BanPattern,
    ) -> Result<(), ValidationError> {
        if valid_wild_card_simple(limits.min_nonwildcard_simple, &pattern.describe()) {
            Ok(())
        } else {
            Err(too_broad(pattern, limits.min_nonwildcard_simple))
        }
    }

    // The gecos comes before the duration on the wire
    fn encode_add(&self, pattern: &BanPattern, duration: u64, reason: &str) -> Vec<String> {
        let mut args = pattern.fields();
        args.push(duration.to_string());
        args.push(reason.to_string());
        args
    }

    fn decode_add(&self, args: &[String]) -> Result<(BanPattern, u64, String), ValidationError> {
        let [gecos, duration, reason] = args else {
            return Err(ValidationError::BadArgumentCount);
        };
        Ok((
            BanPattern::xline(gecos)?,
            parse_wire_duration(duration),
            reason.clone(),
        ))
    }
}

// -----------------------------------------------------------------------------
// RESV Config
// -----------------------------------------------------------------------------

/// Nickname and channel reservation configuration.
pub struct ResvConfig;

impl BanConfig for ResvConfig {
    // Channel or nickname is decided by the name itself
    fn kind(&self) -> BanKind {
        BanKind::ResvNick
    }

    fn add_command(&self) -> BanCommand {
        BanCommand::Resv
    }

    fn remove_command(&self) -> BanCommand {
        BanCommand::Unresv
    }

    fn resolve(&self, _matrix: &Matrix, mask: &str) -> Result<BanPattern, ValidationError> {
        BanPattern::resv(mask)
    }

    fn check_limits(
        &self,
        limits: &BanLimitsConfig,
        pattern: &BanPattern,
    ) -> Result<(), ValidationError> {
        if valid_wild_card_simple(limits.min_nonwildcard_simple, &pattern.describe()) {
            Ok(())
        } else {
            Err(too_broad(pattern, limits.min_nonwildcard_simple))
        }
    }

    fn encode_add(&self, pattern: &BanPattern, duration: u64, reason: &str) -> Vec<String> {
        let mut args = vec![duration.to_string()];
        args.extend(pattern.fields());
        args.push(reason.to_string());
        args
    }

    fn decode_add(&self, args: &[String]) -> Result<(BanPattern, u64, String), ValidationError> {
        let [duration, name, reason] = args else {
            return Err(ValidationError::BadArgumentCount);
        };
        Ok((
            BanPattern::resv(name)?,
            parse_wire_duration(duration),
            reason.clone(),
        ))
    }
}

// -----------------------------------------------------------------------------
// Type Aliases for Handlers
// -----------------------------------------------------------------------------

pub type KlineHandler = GenericBanAddHandler<KlineConfig>;
pub type UnklineHandler = GenericBanRemoveHandler<KlineConfig>;
pub type DlineHandler = GenericBanAddHandler<DlineConfig>;
pub type UndlineHandler = GenericBanRemoveHandler<DlineConfig>;
pub type XlineHandler = GenericBanAddHandler<XlineConfig>;
pub type UnxlineHandler = GenericBanRemoveHandler<XlineConfig>;
pub type ResvHandler = GenericBanAddHandler<ResvConfig>;
pub type UnresvHandler = GenericBanRemoveHandler<ResvConfig>;
