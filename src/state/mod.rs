//! State management module.
//!
//! Contains the Matrix (central ban state) and the local connection table.

pub mod client;
mod matrix;

pub use client::{ClientRegistry, ConnId, Connection, Disconnect, Phase};
pub use matrix::{EXPIRY_EVENT, Matrix, ServerInfo, expiry_event, unix_now};
