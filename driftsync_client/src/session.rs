//! Session layer.
//!
//! Sits between the UDP socket and the reconciliation engine:
//! - performs the hello/welcome handshake;
//! - turns lifecycle datagrams into [`SessionEvent`]s, which never reach the
//!   engine;
//! - validates decoded batches against the entity count announced at
//!   handshake;
//! - coalesces everything received since the last frame into at most one
//!   batch (the highest tick wins).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use driftsync_shared::{
    config::EngineConfig,
    net::{ClientId, NetMsg, UnreliableConn, PROTOCOL_VERSION},
    snapshot::SnapshotBatch,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection state as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket bound, handshake not finished.
    Connecting,
    /// Welcome received; batches are flowing.
    Connected,
    /// Refused, dropped, or timed out. Terminal for this session.
    Disconnected,
}

/// Lifecycle notifications handled by the client itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Accepted {
        client_id: ClientId,
        entity_count: usize,
        tick_hz: u32,
    },
    /// No answer to the hello within the timeout.
    AttemptFailed,
    ServerFull,
    Disconnected {
        reason: String,
    },
    /// Nothing heard from the server within the timeout.
    ConnectionLost,
}

impl SessionEvent {
    /// True when the event ends the session.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Accepted { .. })
    }
}

/// Everything the session produced since the previous frame.
#[derive(Debug, Default)]
pub struct FrameInput {
    /// Highest-tick valid batch received, if any.
    pub batch: Option<SnapshotBatch>,
    /// Number of valid batches folded into `batch`.
    pub coalesced: usize,
    pub events: Vec<SessionEvent>,
}

/// Keeps only the highest-tick batch.
pub fn coalesce_latest<I>(batches: I) -> Option<SnapshotBatch>
where
    I: IntoIterator<Item = SnapshotBatch>,
{
    batches.into_iter().max_by_key(|b| b.tick)
}

/// Client end of one server session.
pub struct Session {
    conn: UnreliableConn,
    state: SessionState,
    client_id: Option<ClientId>,
    entity_count: Option<usize>,
    timeout: Duration,
    last_heard: Instant,
    rejected_batches: u64,
}

impl Session {
    /// Binds a local UDP socket towards the configured server.
    pub async fn open(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let conn = UnreliableConn::connect(bind, server_addr).await?;

        info!(server = %server_addr, "Opening session");

        Ok(Self {
            conn,
            state: SessionState::Connecting,
            client_id: None,
            entity_count: None,
            timeout: Duration::from_millis(cfg.timeout_ms),
            last_heard: Instant::now(),
            rejected_batches: 0,
        })
    }

    /// Sends hello and waits for the server's answer.
    ///
    /// Batches that race ahead of the welcome are ignored.
    pub async fn handshake(&mut self) -> anyhow::Result<SessionEvent> {
        self.conn
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(self.finish(SessionEvent::AttemptFailed));
            }
            let msg = match self.conn.recv_timeout(remaining).await {
                Ok(Some(msg)) => msg,
                Ok(None) => return Ok(self.finish(SessionEvent::AttemptFailed)),
                // Nobody listening yet surfaces as a refused recv on some platforms.
                Err(e) => {
                    debug!(error = %e, "Handshake recv failed");
                    return Ok(self.finish(SessionEvent::AttemptFailed));
                }
            };
            match msg {
                NetMsg::Welcome {
                    client_id,
                    entity_count,
                    tick_hz,
                } => {
                    self.state = SessionState::Connected;
                    self.client_id = Some(client_id);
                    self.entity_count = Some(entity_count);
                    self.last_heard = Instant::now();
                    info!(client_id = ?client_id, entity_count, tick_hz, "Connection accepted");
                    return Ok(SessionEvent::Accepted {
                        client_id,
                        entity_count,
                        tick_hz,
                    });
                }
                NetMsg::ServerFull => return Ok(self.finish(SessionEvent::ServerFull)),
                NetMsg::Disconnect { reason } => {
                    return Ok(self.finish(SessionEvent::Disconnected { reason }))
                }
                other => debug!(?other, "Ignoring message before welcome"),
            }
        }
    }

    /// Drains the socket without blocking.
    pub fn poll(&mut self) -> anyhow::Result<FrameInput> {
        let mut input = FrameInput::default();
        if self.state != SessionState::Connected {
            return Ok(input);
        }

        let msgs = self.conn.drain_ready()?;
        if !msgs.is_empty() {
            self.last_heard = Instant::now();
        }

        let mut batches = Vec::new();
        for msg in msgs {
            match msg {
                NetMsg::EntityList(batch) => match batch.validate(self.entity_count) {
                    Ok(()) => batches.push(batch),
                    Err(e) => {
                        self.rejected_batches += 1;
                        warn!(error = %e, "Rejecting malformed batch");
                    }
                },
                NetMsg::Disconnect { reason } => {
                    input
                        .events
                        .push(self.finish(SessionEvent::Disconnected { reason }));
                    return Ok(input);
                }
                other => debug!(?other, "Unhandled message"),
            }
        }

        if self.last_heard.elapsed() > self.timeout {
            input.events.push(self.finish(SessionEvent::ConnectionLost));
            return Ok(input);
        }

        input.coalesced = batches.len();
        input.batch = coalesce_latest(batches);
        Ok(input)
    }

    /// Tells the server we are leaving. Best effort.
    pub async fn close(&mut self) -> anyhow::Result<()> {
        if let (SessionState::Connected, Some(client_id)) = (self.state, self.client_id) {
            self.conn.send(&NetMsg::Goodbye { client_id }).await?;
            info!(client_id = ?client_id, "Session closed");
        }
        self.state = SessionState::Disconnected;
        Ok(())
    }

    fn finish(&mut self, event: SessionEvent) -> SessionEvent {
        match &event {
            SessionEvent::AttemptFailed => warn!("Connection attempt failed"),
            SessionEvent::ServerFull => warn!("Server is full"),
            SessionEvent::Disconnected { reason } => info!(reason = %reason, "Disconnected"),
            SessionEvent::ConnectionLost => warn!("Connection lost"),
            SessionEvent::Accepted { .. } => {}
        }
        self.state = SessionState::Disconnected;
        event
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Entity count agreed at handshake.
    pub fn entity_count(&self) -> Option<usize> {
        self.entity_count
    }

    pub fn rejected_batches(&self) -> u64 {
        self.rejected_batches
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.conn.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.conn.peer_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_shared::{
        math::Vec2,
        net::{decode_from_bytes, encode_to_bytes},
        snapshot::EntitySnapshot,
    };
    use tokio::net::UdpSocket;

    fn batch(tick: u32) -> SnapshotBatch {
        SnapshotBatch::new(tick, vec![EntitySnapshot::new(Vec2::ZERO, Vec2::ZERO)])
    }

    #[test]
    fn coalesce_keeps_highest_tick() {
        let out = coalesce_latest(vec![batch(4), batch(9), batch(2)]);
        assert_eq!(out.map(|b| b.tick), Some(9));
        assert!(coalesce_latest(Vec::new()).is_none());
    }

    #[test]
    fn only_accepted_is_non_terminal() {
        assert!(!SessionEvent::Accepted {
            client_id: ClientId(1),
            entity_count: 1,
            tick_hz: 20
        }
        .is_terminal());
        assert!(SessionEvent::ConnectionLost.is_terminal());
        assert!(SessionEvent::ServerFull.is_terminal());
    }

    /// Fake server socket that answers a hello with `reply`.
    async fn fake_server() -> anyhow::Result<(UdpSocket, EngineConfig)> {
        let sock = UdpSocket::bind("127.0.0.1:0").await?;
        let cfg = EngineConfig {
            server_addr: sock.local_addr()?.to_string(),
            timeout_ms: 500,
            ..Default::default()
        };
        Ok((sock, cfg))
    }

    async fn answer_hello(sock: &UdpSocket, reply: NetMsg) -> anyhow::Result<SocketAddr> {
        let mut buf = vec![0u8; 2048];
        let (n, from) = sock.recv_from(&mut buf).await?;
        assert!(matches!(
            decode_from_bytes(&buf[..n])?,
            NetMsg::Hello { protocol: PROTOCOL_VERSION }
        ));
        sock.send_to(&encode_to_bytes(&reply)?, from).await?;
        Ok(from)
    }

    #[tokio::test]
    async fn handshake_accepts_welcome_and_coalesces_batches() -> anyhow::Result<()> {
        let (server, cfg) = fake_server().await?;
        let mut session = Session::open(&cfg).await?;

        let welcome = NetMsg::Welcome {
            client_id: ClientId(7),
            entity_count: 1,
            tick_hz: 20,
        };
        let (event, from) = tokio::join!(session.handshake(), answer_hello(&server, welcome));
        let from = from?;
        assert_eq!(
            event?,
            SessionEvent::Accepted {
                client_id: ClientId(7),
                entity_count: 1,
                tick_hz: 20
            }
        );
        assert_eq!(session.state(), SessionState::Connected);

        for tick in [3, 5, 4] {
            server
                .send_to(&encode_to_bytes(&NetMsg::EntityList(batch(tick)))?, from)
                .await?;
        }
        // Wrong entity count: rejected at the boundary.
        let bad = SnapshotBatch::new(6, vec![EntitySnapshot::default(); 2]);
        server
            .send_to(&encode_to_bytes(&NetMsg::EntityList(bad))?, from)
            .await?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let input = session.poll()?;
        assert_eq!(input.batch.map(|b| b.tick), Some(5));
        assert_eq!(input.coalesced, 3);
        assert!(input.events.is_empty());
        assert_eq!(session.rejected_batches(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn handshake_reports_full_server() -> anyhow::Result<()> {
        let (server, cfg) = fake_server().await?;
        let mut session = Session::open(&cfg).await?;
        let (event, _) = tokio::join!(
            session.handshake(),
            answer_hello(&server, NetMsg::ServerFull)
        );
        assert_eq!(event?, SessionEvent::ServerFull);
        assert_eq!(session.state(), SessionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn handshake_times_out_without_answer() -> anyhow::Result<()> {
        let (_server, mut cfg) = fake_server().await?;
        cfg.timeout_ms = 50;
        let mut session = Session::open(&cfg).await?;
        assert_eq!(session.handshake().await?, SessionEvent::AttemptFailed);
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_message_ends_session() -> anyhow::Result<()> {
        let (server, cfg) = fake_server().await?;
        let mut session = Session::open(&cfg).await?;
        let welcome = NetMsg::Welcome {
            client_id: ClientId(1),
            entity_count: 1,
            tick_hz: 20,
        };
        let (event, from) = tokio::join!(session.handshake(), answer_hello(&server, welcome));
        event?;
        let bye = NetMsg::Disconnect {
            reason: "kicked".into(),
        };
        server.send_to(&encode_to_bytes(&bye)?, from?).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let input = session.poll()?;
        assert_eq!(
            input.events,
            vec![SessionEvent::Disconnected {
                reason: "kicked".into()
            }]
        );
        assert_eq!(session.state(), SessionState::Disconnected);
        Ok(())
    }

    #[tokio::test]
    async fn silent_server_is_reported_lost() -> anyhow::Result<()> {
        let (server, mut cfg) = fake_server().await?;
        cfg.timeout_ms = 50;
        let mut session = Session::open(&cfg).await?;
        let welcome = NetMsg::Welcome {
            client_id: ClientId(2),
            entity_count: 1,
            tick_hz: 20,
        };
        let (event, from) = tokio::join!(session.handshake(), answer_hello(&server, welcome));
        from?;
        assert!(matches!(event?, SessionEvent::Accepted { .. }));

        assert!(session.poll()?.events.is_empty());
        tokio::time::sleep(Duration::from_millis(80)).await;

        let input = session.poll()?;
        assert_eq!(input.events, vec![SessionEvent::ConnectionLost]);
        assert!(input.batch.is_none());
        assert_eq!(session.state(), SessionState::Disconnected);
        // Nothing more is reported once the session is over.
        assert!(session.poll()?.events.is_empty());
        Ok(())
    }
}
