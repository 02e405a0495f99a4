//! Server-to-server ban propagation.
//!
//! - [`capab`]: ban commands and the capabilities that gate them
//! - [`topology`]: spanning tree of known servers
//! - [`link`]: direct peers and the messages queued to them
//! - [`router`]: targeted, clustered and remote routing decisions

pub mod capab;
pub mod link;
pub mod router;
pub mod topology;

pub use capab::{BanCommand, Capability, CapabilitySet, CommandSet};
pub use link::{LinkState, PeerMessage};
pub use router::{
    ClusterEntry, Forward, Issuer, LocalAction, PropagationRouter, Routing, SharedEntry,
};
pub use topology::TopologyGraph;
