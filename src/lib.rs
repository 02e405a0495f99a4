//! slircd-bans - server ban subsystem of the Straylight IRC daemon.
//!
//! K-lines, D-lines, X-lines and reservations: storage and persistence,
//! matching, enforcement against local connections, expiry, and
//! propagation between linked servers.

pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod handlers;
pub mod metrics;
pub mod security;
pub mod state;
pub mod sync;
pub mod telemetry;
