//! `driftsync_server`
//!
//! Demo server for the reconciliation client:
//! - Fixed timestep arena simulation of wandering entities
//! - UDP handshake with a client cap
//! - Broadcasts one full-state `EntityList` per tick
//! - Optional simulated loss/reordering to exercise the client
//!
//! Networking model:
//! - UDP only, one JSON message per datagram

pub mod arena;
pub mod server;

pub use server::SnapshotServer;
