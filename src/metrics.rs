//! Prometheus metrics for ban enforcement.
//!
//! - `ban_commands_total{command}` - ban commands processed
//! - `ban_command_duration_seconds{command}` - command latency histogram
//! - `ban_command_errors_total{command,error}` - rejected commands
//! - `bans_added_total{kind}`, `bans_removed_total{kind}`,
//!   `bans_expired_total{kind}` - store changes
//! - `bans_enforced_total{kind}` - connections refused or disconnected
//! - `ban_peer_commands_total{command,result}` - relayed commands by outcome
//! - `ban_forwards_total{link}` - copies sent down each link
//!
//! Recording before [`init`] is a no-op.

use crate::security::BanKind;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

pub static COMMAND_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
pub static COMMAND_LATENCY: OnceLock<HistogramVec> = OnceLock::new();
pub static COMMAND_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();
pub static BANS_ADDED: OnceLock<IntCounterVec> = OnceLock::new();
pub static BANS_REMOVED: OnceLock<IntCounterVec> = OnceLock::new();
pub static BANS_EXPIRED: OnceLock<IntCounterVec> = OnceLock::new();
pub static BANS_ENFORCED: OnceLock<IntCounterVec> = OnceLock::new();
pub static PEER_COMMANDS: OnceLock<IntCounterVec> = OnceLock::new();
pub static FORWARDS: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize the metrics registry. Safe to call more than once.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if $metric.set(m.clone()).is_ok()
                        && let Err(e) = r.register(Box::new(m))
                    {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(COMMAND_COUNTER, IntCounterVec::new(Opts::new("ban_commands_total", "Ban commands processed"), &["command"]));
    register!(COMMAND_LATENCY, HistogramVec::new(
        HistogramOpts::new("ban_command_duration_seconds", "Ban command latency")
            .buckets(vec![0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        &["command"]));
    register!(COMMAND_ERRORS, IntCounterVec::new(Opts::new("ban_command_errors_total", "Rejected ban commands"), &["command", "error"]));
    register!(BANS_ADDED, IntCounterVec::new(Opts::new("bans_added_total", "Bans added"), &["kind"]));
    register!(BANS_REMOVED, IntCounterVec::new(Opts::new("bans_removed_total", "Bans removed"), &["kind"]));
    register!(BANS_EXPIRED, IntCounterVec::new(Opts::new("bans_expired_total", "Temporary bans expired"), &["kind"]));
    register!(BANS_ENFORCED, IntCounterVec::new(Opts::new("bans_enforced_total", "Connections refused or disconnected by a ban"), &["kind"]));
    register!(PEER_COMMANDS, IntCounterVec::new(Opts::new("ban_peer_commands_total", "Ban commands received from peers"), &["command", "result"]));
    register!(FORWARDS, IntCounterVec::new(Opts::new("ban_forwards_total", "Ban commands sent to peers"), &["link"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

fn inc(metric: &OnceLock<IntCounterVec>, labels: &[&str], by: u64) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc_by(by);
    }
}

/// Record a command execution with latency.
#[inline]
pub fn record_command(command: &str, duration_secs: f64) {
    inc(&COMMAND_COUNTER, &[command], 1);
    if let Some(h) = COMMAND_LATENCY.get() {
        h.with_label_values(&[command]).observe(duration_secs);
    }
}

#[inline]
pub fn record_command_error(command: &str, error: &str) {
    inc(&COMMAND_ERRORS, &[command, error], 1);
}

#[inline]
pub fn record_ban_added(kind: BanKind) {
    inc(&BANS_ADDED, &[kind.name()], 1);
}

#[inline]
pub fn record_ban_removed(kind: BanKind) {
    inc(&BANS_REMOVED, &[kind.name()], 1);
}

#[inline]
pub fn record_ban_expired(kind: BanKind) {
    inc(&BANS_EXPIRED, &[kind.name()], 1);
}

#[inline]
pub fn record_enforced(kind: BanKind, count: usize) {
    if count > 0 {
        inc(&BANS_ENFORCED, &[kind.name()], count as u64);
    }
}

#[inline]
pub fn record_peer_command(command: &str, result: &str) {
    inc(&PEER_COMMANDS, &[command, result], 1);
}

#[inline]
pub fn record_forwarded(link: &str) {
    inc(&FORWARDS, &[link], 1);
}
