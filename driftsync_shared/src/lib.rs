//! `driftsync_shared`
//!
//! Types used by both client and server.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (math, snapshots, net, config).
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod snapshot;
