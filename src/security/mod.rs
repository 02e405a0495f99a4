//! Ban storage, matching and enforcement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         BanStore                             │
//! ├──────────────┬──────────────────┬──────────────┬─────────────┤
//! │ per-kind     │  AddressTable    │  BanJournal  │  enforce    │
//! │ BanList      │  K/D-line hash   │  MessagePack │  sweep on   │
//! │ K/D/X/RESV   │  buckets         │  atomic save │  new bans   │
//! └──────────────┴──────────────────┴──────────────┴─────────────┘
//! ```

pub mod address_table;
pub mod ban_store;
pub mod enforce;
pub mod hostmask;
pub mod persistence;
pub mod xlines;

pub use ban_store::BanStore;
pub use enforce::BanHit;
pub use hostmask::{HostMask, wildcard_match};
pub use persistence::BanJournal;
pub use xlines::{
    BanId, BanKind, BanMatch, BanPattern, BanRecord, Timestamp, UserContext, is_channel_name,
};
