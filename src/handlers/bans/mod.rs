//! Ban command handlers.
//!
//! Commands for server bans (operator-only):
//! - KLINE/UNKLINE: Ban by user@host mask
//! - DLINE/UNDLINE: Ban by IP address or CIDR block
//! - XLINE/UNXLINE: Ban by realname (gecos)
//! - RESV/UNRESV: Reserve a nickname or channel name

use super::Handler;
use std::collections::HashMap;

pub mod common;
mod xlines;

pub use xlines::{
    BanConfig, DlineConfig, DlineHandler, GenericBanAddHandler, GenericBanRemoveHandler,
    KlineConfig, KlineHandler, ResvConfig, ResvHandler, UndlineHandler, UnklineHandler,
    UnresvHandler, UnxlineHandler, XlineConfig, XlineHandler,
};

pub fn register(map: &mut HashMap<&'static str, Box<dyn Handler>>) {
    map.insert("KLINE", Box::new(KlineHandler::new(KlineConfig)));
    map.insert("UNKLINE", Box::new(UnklineHandler::new(KlineConfig)));
    map.insert("DLINE", Box::new(DlineHandler::new(DlineConfig)));
    map.insert("UNDLINE", Box::new(UndlineHandler::new(DlineConfig)));
    map.insert("XLINE", Box::new(XlineHandler::new(XlineConfig)));
    map.insert("UNXLINE", Box::new(UnxlineHandler::new(XlineConfig)));
    map.insert("RESV", Box::new(ResvHandler::new(ResvConfig)));
    map.insert("UNRESV", Box::new(UnresvHandler::new(ResvConfig)));
}
