//! Networking primitives.
//!
//! Goals:
//! - Provide a simple unreliable (UDP) channel, one message per datagram.
//! - Provide the lifecycle and entity-list message types used by client/server.
//! - Keep serialization explicit and versionable.
//!
//! Delivery is best effort: datagrams may be lost, duplicated or reordered.
//! Sequencing is handled by the receiver using the batch tick.

use std::net::SocketAddr;

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::{net::UdpSocket, time};
use tracing::warn;

use crate::snapshot::SnapshotBatch;

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest datagram either side will read.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection lifecycle ───
    Hello {
        protocol: u32,
    },
    /// Connection accepted. Announces the fixed entity count for the session.
    Welcome {
        client_id: ClientId,
        entity_count: usize,
        tick_hz: u32,
    },
    /// No free incoming connections.
    ServerFull,
    /// Client is leaving.
    Goodbye {
        client_id: ClientId,
    },
    /// Server is dropping the client.
    Disconnect {
        reason: String,
    },

    // ─── Replication ───
    /// Full state of every tracked entity at one tick.
    EntityList(SnapshotBatch),
}

impl NetMsg {
    /// True for messages the session layer consumes itself.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, NetMsg::EntityList(_))
    }
}

/// Unreliable channel over UDP, connected to a single peer.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<NetMsg> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        decode_from_bytes(&buf[..n])
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<NetMsg>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Ok(Some(decode_from_bytes(&buf[..n])?)),
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    /// Returns every datagram already queued on the socket without waiting.
    ///
    /// Datagrams that fail to decode are skipped; the caller only sees
    /// well-formed messages.
    pub fn drain_ready(&self) -> anyhow::Result<Vec<NetMsg>> {
        let mut out = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.try_recv(&mut buf) {
                Ok(n) => match decode_from_bytes(&buf[..n]) {
                    Ok(msg) => out.push(msg),
                    Err(e) => warn!(error = %e, bytes = n, "Dropping undecodable datagram"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send; the peer is gone
                // or not up yet. Silence is handled by the caller's timeout.
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => break,
                Err(e) => return Err(e).context("udp try_recv"),
            }
        }
        Ok(out)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{math::Vec2, snapshot::EntitySnapshot};

    #[test]
    fn entity_list_roundtrip_bytes() {
        let msg = NetMsg::EntityList(SnapshotBatch::new(
            42,
            vec![
                EntitySnapshot::new(Vec2::new(1.5, -2.0), Vec2::new(0.0, 3.0)),
                EntitySnapshot::teleported(Vec2::new(-99.0, 10.0), Vec2::new(1.0, 0.0)),
            ],
        ));
        let bytes = encode_to_bytes(&msg).unwrap();
        let back = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
        assert!(!back.is_lifecycle());
    }

    #[test]
    fn lifecycle_messages_are_flagged() {
        assert!(NetMsg::ServerFull.is_lifecycle());
        assert!(NetMsg::Disconnect {
            reason: "bye".into()
        }
        .is_lifecycle());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(decode_from_bytes(b"\x00\x01not json").is_err());
    }

    #[tokio::test]
    async fn drain_ready_collects_queued_datagrams() -> anyhow::Result<()> {
        let any: SocketAddr = "127.0.0.1:0".parse()?;
        let a = UdpSocket::bind(any).await?;
        let conn = UnreliableConn::connect(any, a.local_addr()?).await?;
        a.connect(conn.local_addr()?).await?;

        for tick in 1..=3 {
            let msg = NetMsg::EntityList(SnapshotBatch::new(tick, vec![EntitySnapshot::default()]));
            a.send(&encode_to_bytes(&msg)?).await?;
        }
        a.send(b"junk").await?;

        // Wait for the first datagram so the rest are queued as well.
        let first = conn.recv_timeout(std::time::Duration::from_secs(1)).await?;
        assert!(first.is_some());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let rest = conn.drain_ready()?;
        assert_eq!(rest.len(), 2);
        Ok(())
    }
}
