//! `driftsync_client`
//!
//! Client-side systems:
//! - Low-pass filtering of positions/velocities
//! - Tick sequencing with selectable gap policy
//! - Dead-reckoning extrapolation
//! - Reconciliation of snapshot batches into per-frame display state
//! - UDP session handling (handshake, validation, coalescing)

pub mod client;
pub mod extrapolate;
pub mod filter;
pub mod reconcile;
pub mod sequencer;
pub mod session;

pub use client::GameClient;
pub use reconcile::ReconciliationEngine;
