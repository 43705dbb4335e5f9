//! Configuration system.
//!
//! Loads configuration from JSON strings (file IO left to app). Every field
//! has a default so partial files are accepted.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the client treats a batch whose tick skips past `watermark + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TickPolicy {
    /// Advance the watermark, record the loss, and reconcile as usual.
    #[default]
    AcceptWithLoss,
    /// Drop the batch but advance the watermark so the next contiguous tick
    /// is accepted.
    RejectGaps,
}

impl FromStr for TickPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept_with_loss" | "accept" => Ok(TickPolicy::AcceptWithLoss),
            "reject_gaps" | "reject" => Ok(TickPolicy::RejectGaps),
            other => Err(format!("unknown tick policy '{other}'")),
        }
    }
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Server broadcast rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Client frame rate.
    #[serde(default = "default_frame_hz")]
    pub frame_hz: u32,
    /// Number of simulated entities (server only).
    #[serde(default = "default_entity_count")]
    pub entity_count: usize,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Entities leaving `[-extent, extent]` on either axis wrap around.
    #[serde(default = "default_arena_half_extent")]
    pub arena_half_extent: f32,
    /// Probability that the server drops an outgoing batch.
    #[serde(default)]
    pub loss_rate: f32,
    /// Probability that the server delays a batch behind its successor.
    #[serde(default)]
    pub reorder_rate: f32,
    /// Client considers the connection lost after this long without data.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f32,
    #[serde(default = "default_jump_threshold")]
    pub jump_threshold: f32,
    #[serde(default)]
    pub tick_policy: TickPolicy,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    20
}

fn default_frame_hz() -> u32 {
    60
}

fn default_entity_count() -> usize {
    16
}

fn default_max_clients() -> usize {
    8
}

fn default_arena_half_extent() -> f32 {
    100.0
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_smoothing_factor() -> f32 {
    0.8
}

fn default_jump_threshold() -> f32 {
    40.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            frame_hz: default_frame_hz(),
            entity_count: default_entity_count(),
            max_clients: default_max_clients(),
            arena_half_extent: default_arena_half_extent(),
            loss_rate: 0.0,
            reorder_rate: 0.0,
            timeout_ms: default_timeout_ms(),
            smoothing_factor: default_smoothing_factor(),
            jump_threshold: default_jump_threshold(),
            tick_policy: TickPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"tick_hz": 30, "tick_policy": "reject_gaps"}"#)
            .unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.tick_policy, TickPolicy::RejectGaps);
        assert_eq!(cfg.frame_hz, 60);
        assert_eq!(cfg.smoothing_factor, 0.8);
        assert_eq!(cfg.server_addr, "127.0.0.1:40000");
    }

    #[test]
    fn tick_policy_parses_short_names() {
        assert_eq!("accept".parse(), Ok(TickPolicy::AcceptWithLoss));
        assert_eq!("reject_gaps".parse(), Ok(TickPolicy::RejectGaps));
        assert!("sometimes".parse::<TickPolicy>().is_err());
    }
}
