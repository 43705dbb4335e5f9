//! Server implementation.
//!
//! A fixed-timestep snapshot broadcaster. It supports:
//! - Hello/welcome handshake over UDP, with a client cap
//! - Arena simulation of wandering entities
//! - One full-state `EntityList` per client per tick
//! - Simulated network impairment (loss and reordering) on outgoing batches
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Ticks start at 1 and increase by one per step.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use driftsync_shared::{
    config::EngineConfig,
    math::Vec2,
    net::{decode_from_bytes, encode_to_bytes, ClientId, NetMsg, MAX_DATAGRAM, PROTOCOL_VERSION},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{net::UdpSocket, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::arena::Arena;

/// Connected client state.
struct ClientSlot {
    id: ClientId,
    /// A batch held back to be sent after its successor.
    held: Option<Vec<u8>>,
    sent: u64,
    dropped: u64,
}

/// Snapshot server.
pub struct SnapshotServer {
    pub cfg: EngineConfig,
    udp: UdpSocket,
    clients: HashMap<SocketAddr, ClientSlot>,
    next_client_id: u32,
    arena: Arena,
    tick: u32,
    rng: StdRng,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
    shutdown: bool,
}

impl SnapshotServer {
    /// Binds the server socket and seeds the arena from entropy.
    pub async fn bind(cfg: EngineConfig) -> anyhow::Result<Self> {
        let seed = rand::random();
        Self::bind_seeded(cfg, seed).await
    }

    /// Binds with a fixed simulation/impairment seed.
    pub async fn bind_seeded(cfg: EngineConfig, seed: u64) -> anyhow::Result<Self> {
        if cfg.entity_count == 0 {
            anyhow::bail!("entity_count must be at least 1");
        }
        if !(cfg.arena_half_extent > 0.0) {
            anyhow::bail!("arena_half_extent must be positive");
        }
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;
        let arena = Arena::new(cfg.entity_count, cfg.arena_half_extent, seed);

        Ok(Self {
            cfg,
            udp,
            clients: HashMap::new(),
            next_client_id: 1,
            arena,
            tick: 0,
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
            console_rx: None,
            shutdown: false,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// True once `quit` was entered on the console.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Last tick broadcast (0 before the first step).
    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    /// Waits up to `timeout` for the first client to say hello.
    pub async fn accept_one(&mut self, timeout: Duration) -> anyhow::Result<ClientId> {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_control().await?;
            if let Some(slot) = self.clients.values().next() {
                return Ok(slot.id);
            }
            if Instant::now() >= deadline {
                anyhow::bail!("no client connected within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz.max(1) as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step and broadcasts the result.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.process_console_commands().await?;
        self.poll_control().await?;
        self.arena.step(dt_sec);
        self.tick += 1;
        self.broadcast().await?;
        self.arena.clear_teleports();
        Ok(())
    }

    async fn process_console_commands(&mut self) -> anyhow::Result<()> {
        // Collect lines first to avoid borrow conflict
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            for out in self.exec_console(&line).await? {
                println!("{}", out);
            }
        }
        Ok(())
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => Ok(self.status()),
            "teleport" => {
                let parsed = match &tokens[1..] {
                    [i, x, y] => i
                        .parse::<usize>()
                        .ok()
                        .zip(x.parse::<f32>().ok())
                        .zip(y.parse::<f32>().ok()),
                    _ => None,
                };
                let Some(((index, x), y)) = parsed else {
                    return Ok(vec!["Usage: teleport <index> <x> <y>".to_string()]);
                };
                if self.teleport(index, Vec2::new(x, y)) {
                    Ok(vec![format!("Entity {index} teleported to ({x}, {y})")])
                } else {
                    Ok(vec![format!("No entity {index}")])
                }
            }
            "kick" => {
                let Some(id) = tokens.get(1).and_then(|t| t.parse::<u32>().ok()) else {
                    return Ok(vec!["Usage: kick <client id>".to_string()]);
                };
                if self.kick(ClientId(id), "kicked by operator").await? {
                    Ok(vec![format!("Client {id} kicked")])
                } else {
                    Ok(vec![format!("No client {id}")])
                }
            }
            "loss" | "reorder" => {
                let Some(rate) = tokens
                    .get(1)
                    .and_then(|t| t.parse::<f32>().ok())
                    .filter(|r| (0.0..=1.0).contains(r))
                else {
                    return Ok(vec![format!("Usage: {} <0..1>", tokens[0])]);
                };
                if tokens[0] == "loss" {
                    self.cfg.loss_rate = rate;
                } else {
                    self.cfg.reorder_rate = rate;
                }
                Ok(vec![format!("{} rate set to {rate}", tokens[0])])
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                self.disconnect_all("server shutting down").await?;
                self.shutdown = true;
                Ok(Vec::new())
            }
            other => Ok(vec![format!("Unknown command: {other}")]),
        }
    }

    /// Handles every control datagram already queued on the socket.
    pub async fn poll_control(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => match decode_from_bytes(&buf[..n]) {
                    Ok(msg) => self.handle_message(from, msg).await?,
                    Err(e) => debug!(%from, error = %e, "Ignoring undecodable datagram"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                // A client went away; sends to it bounce back as ICMP errors.
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e).context("udp recv"),
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, from: SocketAddr, msg: NetMsg) -> anyhow::Result<()> {
        match msg {
            NetMsg::Hello { protocol } if protocol != PROTOCOL_VERSION => {
                warn!(%from, protocol, "Protocol mismatch");
                self.send_to(
                    &NetMsg::Disconnect {
                        reason: format!("protocol {protocol} unsupported, expected {PROTOCOL_VERSION}"),
                    },
                    from,
                )
                .await?;
            }
            NetMsg::Hello { .. } => {
                let id = match self.clients.get(&from) {
                    // Repeated hello (our welcome was lost): answer again.
                    Some(slot) => slot.id,
                    None if self.clients.len() >= self.cfg.max_clients => {
                        warn!(%from, max = self.cfg.max_clients, "Server full, refusing client");
                        self.send_to(&NetMsg::ServerFull, from).await?;
                        return Ok(());
                    }
                    None => {
                        let id = ClientId(self.next_client_id);
                        self.next_client_id += 1;
                        self.clients.insert(
                            from,
                            ClientSlot {
                                id,
                                held: None,
                                sent: 0,
                                dropped: 0,
                            },
                        );
                        info!(client_id = ?id, %from, "Client connected");
                        id
                    }
                };
                self.send_to(
                    &NetMsg::Welcome {
                        client_id: id,
                        entity_count: self.arena.len(),
                        tick_hz: self.cfg.tick_hz,
                    },
                    from,
                )
                .await?;
            }
            NetMsg::Goodbye { client_id } => {
                if let Some(slot) = self.clients.remove(&from) {
                    info!(
                        client_id = ?client_id,
                        sent = slot.sent,
                        dropped = slot.dropped,
                        "Client left"
                    );
                }
            }
            other => debug!(%from, ?other, "Unexpected message"),
        }
        Ok(())
    }

    async fn broadcast(&mut self) -> anyhow::Result<()> {
        if self.clients.is_empty() {
            return Ok(());
        }
        let msg = NetMsg::EntityList(self.arena.snapshot(self.tick));
        let payload = encode_to_bytes(&msg).context("serialize batch")?;

        for (addr, slot) in self.clients.iter_mut() {
            if self.rng.gen::<f32>() < self.cfg.loss_rate {
                slot.dropped += 1;
                debug!(tick = self.tick, client_id = ?slot.id, "Simulated loss");
                continue;
            }
            if slot.held.is_none() && self.rng.gen::<f32>() < self.cfg.reorder_rate {
                slot.held = Some(payload.to_vec());
                continue;
            }
            for datagram in std::iter::once(&payload[..]).chain(slot.held.take().as_deref()) {
                match self.udp.send_to(datagram, *addr).await {
                    Ok(_) => slot.sent += 1,
                    Err(e) => debug!(client_id = ?slot.id, %addr, error = %e, "Batch send failed"),
                }
            }
        }
        Ok(())
    }

    /// Disconnects a client by id.
    pub async fn kick(&mut self, client_id: ClientId, reason: &str) -> anyhow::Result<bool> {
        let Some(addr) = self
            .clients
            .iter()
            .find(|(_, slot)| slot.id == client_id)
            .map(|(addr, _)| *addr)
        else {
            return Ok(false);
        };
        self.clients.remove(&addr);
        self.send_to(
            &NetMsg::Disconnect {
                reason: reason.to_string(),
            },
            addr,
        )
        .await?;
        info!(client_id = ?client_id, reason, "Client kicked");
        Ok(true)
    }

    /// Disconnects everybody, e.g. on shutdown.
    pub async fn disconnect_all(&mut self, reason: &str) -> anyhow::Result<()> {
        let ids: Vec<ClientId> = self.clients.values().map(|slot| slot.id).collect();
        for id in ids {
            self.kick(id, reason).await?;
        }
        Ok(())
    }

    /// Teleports entity `index` on the next broadcast.
    pub fn teleport(&mut self, index: usize, to: Vec2) -> bool {
        self.arena.teleport(index, to).is_some()
    }

    /// Human-readable status lines.
    pub fn status(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.push(format!("Tick: {}", self.tick));
        out.push(format!("Entities: {}", self.arena.len()));
        out.push(format!(
            "Clients: {}/{}",
            self.clients.len(),
            self.cfg.max_clients
        ));
        for (addr, slot) in &self.clients {
            out.push(format!(
                "  {:?}: udp={} sent={} dropped={}",
                slot.id, addr, slot.sent, slot.dropped
            ));
        }
        out
    }

    async fn send_to(&self, msg: &NetMsg, to: SocketAddr) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.udp.send_to(&payload, to).await.context("udp send")?;
        Ok(())
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(
    tick_hz: u32,
    entity_count: usize,
) -> anyhow::Result<(SnapshotServer, EngineConfig)> {
    let cfg = EngineConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        tick_hz,
        entity_count,
        ..Default::default()
    };
    let server = SnapshotServer::bind_seeded(cfg, 0x5eed).await?;

    let mut cfg = server.cfg.clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
