//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p driftsync_client -- [--addr 127.0.0.1:40000] [--frame-hz 60]
//!                                    [--policy accept|reject] [--frames N]
//!                                    [--config client.json]
//!
//! The client connects to the server, then runs a fixed-rate frame loop:
//! each frame it drains received batches, reconciles them into displayed
//! entity state, and periodically logs a summary. It exits when the session
//! ends or after `--frames` frames.

use std::env;
use std::time::Duration;

use anyhow::Context;
use driftsync_client::GameClient;
use driftsync_shared::config::{EngineConfig, TickPolicy};
use tokio::time::Instant;
use tracing::info;

struct Args {
    cfg: EngineConfig,
    frames: Option<u64>,
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = env::args().collect();

    // A config file, if given, is the base that other flags override.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let text = std::fs::read_to_string(&args[i + 1])
                .with_context(|| format!("read config {}", args[i + 1]))?;
            EngineConfig::from_json_str(&text).context("parse config")?
        }
        _ => EngineConfig::default(),
    };
    let mut frames = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--frame-hz" if i + 1 < args.len() => {
                cfg.frame_hz = args[i + 1].parse().unwrap_or(60);
                i += 2;
            }
            "--policy" if i + 1 < args.len() => {
                cfg.tick_policy = args[i + 1]
                    .parse::<TickPolicy>()
                    .map_err(anyhow::Error::msg)?;
                i += 2;
            }
            "--frames" if i + 1 < args.len() => {
                frames = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(Args { cfg, frames })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let Args { cfg, frames } = parse_args()?;
    info!(server = %cfg.server_addr, frame_hz = cfg.frame_hz, policy = ?cfg.tick_policy, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    let frame_interval = Duration::from_secs_f32(1.0 / cfg.frame_hz.max(1) as f32);
    let summary_every = u64::from(cfg.frame_hz.max(1));
    let mut last = Instant::now();
    let mut next_frame = last;

    loop {
        let now = Instant::now();
        let elapsed = now.duration_since(last).as_secs_f32();
        last = now;

        let shown = client.frame(elapsed)?;
        let entities = shown.len();
        let first = shown.first().copied();

        if client.frames() % summary_every == 0 {
            if let Some(first) = first {
                info!(
                    tick = ?client.engine().highest_accepted_tick(),
                    entities,
                    x = first.position.x,
                    y = first.position.y,
                    "Frame"
                );
            }
        }

        if !client.is_connected() {
            println!("Session ended.");
            break;
        }
        if frames.is_some_and(|n| client.frames() >= n) {
            client.disconnect().await?;
            break;
        }

        next_frame += frame_interval;
        tokio::time::sleep_until(next_frame).await;
    }

    for line in client.status() {
        println!("{}", line);
    }
    Ok(())
}
