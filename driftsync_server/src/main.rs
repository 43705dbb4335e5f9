//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p driftsync_server -- [--addr 127.0.0.1:40000] [--tick-hz 20]
//!                                    [--entities 16] [--loss 0.1] [--reorder 0.05]
//!                                    [--config server.json]
//!
//! The server simulates wandering entities and broadcasts a full-state batch
//! to every connected client each tick.
//!
//! Console commands:
//!   status                 - Show server status
//!   teleport <i> <x> <y>   - Relocate entity i
//!   kick <client id>       - Disconnect a client
//!   loss <rate>            - Set simulated loss rate (0..1)
//!   reorder <rate>         - Set simulated reorder rate (0..1)
//!   quit                   - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use driftsync_server::server::SnapshotServer;
use driftsync_shared::config::EngineConfig;
use tokio::sync::mpsc;
use tracing::info;

/// Forwards non-empty console lines until EOF, a read error, or the server
/// dropping the receiver.
fn read_console(mut input: impl BufRead, mut prompt: impl Write, tx: mpsc::Sender<String>) {
    loop {
        let _ = write!(prompt, "] ");
        let _ = prompt.flush();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim().to_string();
        if !line.is_empty() && tx.blocking_send(line).is_err() {
            break;
        }
    }
}

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let text = std::fs::read_to_string(&args[i + 1])
                .with_context(|| format!("read config {}", args[i + 1]))?;
            EngineConfig::from_json_str(&text).context("parse config")?
        }
        _ => EngineConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(20);
                i += 2;
            }
            "--entities" if i + 1 < args.len() => {
                cfg.entity_count = args[i + 1].parse().unwrap_or(16);
                i += 2;
            }
            "--loss" if i + 1 < args.len() => {
                cfg.loss_rate = args[i + 1].parse().unwrap_or(0.0);
                i += 2;
            }
            "--reorder" if i + 1 < args.len() => {
                cfg.reorder_rate = args[i + 1].parse().unwrap_or(0.0);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        entities = cfg.entity_count,
        loss = cfg.loss_rate,
        reorder = cfg.reorder_rate,
        "Starting server"
    );

    let mut server = SnapshotServer::bind(cfg.clone())
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        read_console(stdin.lock(), std::io::stdout(), console_tx);
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(1.0 / cfg.tick_hz.max(1) as f32);
    let mut next_tick = tokio::time::Instant::now();

    while !server.shutdown_requested() {
        server.step(tick_interval.as_secs_f32()).await?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
    Ok(())
}
