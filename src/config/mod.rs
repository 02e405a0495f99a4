//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, DatabaseConfig)
//! - [`limits`]: Ban validation limits and expiry scheduling (BanLimitsConfig)
//! - [`oper`]: Operator blocks (OperBlock)
//! - [`auth`]: Client authorization blocks and their ban exemptions (AuthBlock)
//! - [`links`]: Peer, cluster and shared blocks (LinkBlock, ClusterBlock, SharedBlock, ServiceBlock)
//! - [`bans`]: Static bans (KlineBlock, DlineBlock, XlineBlock, ResvBlock)
//! - [`validation`]: Startup and rehash checks

mod auth;
mod bans;
mod limits;
mod links;
mod oper;
mod types;
pub mod validation;

pub use auth::AuthBlock;
pub use bans::{DlineBlock, KlineBlock, ResvBlock, XlineBlock, static_records};
pub use limits::BanLimitsConfig;
pub use links::{ClusterBlock, LinkBlock, ServiceBlock, SharedBlock};
pub use oper::OperBlock;
pub use types::{Config, ConfigError, DatabaseConfig, ServerConfig};
