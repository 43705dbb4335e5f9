//! Client implementation.
//!
//! The client owns:
//! - A [`Session`] (UDP socket, handshake, batch validation/coalescing)
//! - A [`ReconciliationEngine`] fed once per frame
//!
//! Lifecycle events are handled here and never reach the engine. A session
//! that ends resets the engine so a reconnect starts from a clean slate.

use anyhow::Context;
use driftsync_shared::{config::EngineConfig, net::ClientId, snapshot::EntityMotion};
use tracing::{error, info};

use crate::{
    reconcile::{ReconcileConfig, ReconciliationEngine},
    session::{Session, SessionEvent, SessionState},
};

/// High-level client: session plus display smoothing.
pub struct GameClient {
    pub client_id: Option<ClientId>,
    session: Session,
    engine: ReconciliationEngine,
    frames: u64,
    batches_received: u64,
}

impl GameClient {
    /// Connects to a server and performs the handshake.
    ///
    /// Fails if the server refuses or never answers.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let reconcile_cfg =
            ReconcileConfig::from_engine_config(cfg).context("invalid reconcile config")?;
        let mut session = Session::open(cfg).await?;

        let client_id = match session.handshake().await? {
            SessionEvent::Accepted { client_id, .. } => client_id,
            other => anyhow::bail!("connection refused: {other:?}"),
        };

        info!(
            client_id = ?client_id,
            policy = ?reconcile_cfg.policy(),
            smoothing = reconcile_cfg.smoothing_factor(),
            "Connected to server"
        );

        Ok(Self {
            client_id: Some(client_id),
            session,
            engine: ReconciliationEngine::new(reconcile_cfg),
            frames: 0,
            batches_received: 0,
        })
    }

    /// Runs one frame: drain the socket, react to lifecycle events, step the
    /// engine, and return what to draw.
    ///
    /// Engine precondition violations are fatal to the session and are
    /// returned as errors.
    pub fn frame(&mut self, elapsed: f32) -> anyhow::Result<&[EntityMotion]> {
        let input = self.session.poll()?;
        self.frames += 1;
        self.batches_received += input.coalesced as u64;

        if input.events.iter().any(SessionEvent::is_terminal) {
            self.engine.reset();
            return Ok(self.engine.displayed());
        }

        match self.engine.step(input.batch.as_ref(), elapsed) {
            Ok(shown) => Ok(shown),
            Err(e) => {
                error!(error = %e, "Reconciliation failed, dropping session");
                Err(e).context("reconcile")
            }
        }
    }

    /// Leaves the server.
    pub async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.session.close().await?;
        self.engine.reset();
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.state() == SessionState::Connected
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Human-readable status lines.
    pub fn status(&self) -> Vec<String> {
        let stats = self.engine.stats();
        let mut out = Vec::new();
        out.push(format!("Session: {:?}", self.session.state()));
        out.push(format!("Client ID: {:?}", self.client_id));
        out.push(format!("Engine: {:?}", self.engine.state()));
        out.push(format!(
            "Highest tick: {:?}",
            self.engine.highest_accepted_tick()
        ));
        out.push(format!("Entities: {}", self.engine.entity_count()));
        out.push(format!(
            "Frames: {}  batches: {}  rejected: {}",
            self.frames,
            self.batches_received,
            self.session.rejected_batches()
        ));
        out.push(format!(
            "Accepted: {}  stale: {}  gaps: {} ({} ticks lost, {} dropped)",
            stats.accepted, stats.dropped_stale, stats.gaps, stats.ticks_lost, stats.dropped_gap
        ));
        out.push(format!(
            "Discontinuities: {} ({} teleports)",
            stats.discontinuities, stats.teleports
        ));
        out
    }
}
