//! Networking primitives.
//!
//! Goals:
//! - Provide a simple reliable (TCP) and unreliable (UDP) channel.
//! - Provide the input, snapshot and replication messages used by
//!   client/server.
//! - Keep serialization explicit and versionable.
//!
//! Gameplay traffic is fire-and-forget from the simulation's point of view:
//! inputs go out on the unreliable channel and their effect comes back later
//! as a [`PositionSnapshot`] carrying the last applied input `seq`.

use anyhow::{ensure, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    time,
};

use crate::{
    entity::{EntityId, EntityKind},
    math::Vec2,
    movement::MovementInput,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for a single reliable frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Receive buffer size for datagrams.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Identifies a connected client. Assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake (reliable) ───
    Hello {
        protocol: u32,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    /// Server assigns the client its id and controlled entity.
    Welcome {
        client_id: ClientId,
        entity: EntityId,
        spawn: Vec2,
    },

    // ─── Gameplay (unreliable) ───
    /// Client is ready to receive replication.
    ClientReady {
        client_id: ClientId,
    },
    /// Client -> server: sent whenever the normalized input changes.
    MoveInput(InputCommand),
    /// Server -> owner: authoritative position of the controlled entity.
    PositionSnapshot(PositionSnapshot),
    /// Server -> client: position of any other networked entity.
    EntityPositionUpdate(EntityPositionUpdate),
    /// Server -> client: entity left network-tracked state.
    EntityRemoved {
        id: EntityId,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Client input tagged for reconciliation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct InputCommand {
    pub client_id: ClientId,
    /// Strictly increasing per session; echoed back in snapshots.
    pub seq: u64,
    /// Client clock, milliseconds since session start.
    pub timestamp_ms: u64,
    pub input: MovementInput,
}

/// Authoritative position as of input `seq`.
///
/// Inputs are only sent when they change, so a server may keep applying
/// the input of `seq` for many ticks. `held_secs` reports how long it has
/// done so; `None` means every input up to and including `seq` has been
/// applied exactly once and nothing more.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositionSnapshot {
    pub entity: EntityId,
    pub x: f32,
    pub y: f32,
    pub seq: u64,
    #[serde(default)]
    pub held_secs: Option<f32>,
    /// Server clock, milliseconds since server start.
    pub timestamp_ms: u64,
}

impl PositionSnapshot {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Replicated position of a non-controlled entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntityPositionUpdate {
    pub id: EntityId,
    pub kind: EntityKind,
    pub x: f32,
    pub y: f32,
}

impl EntityPositionUpdate {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        let payload = encode_to_bytes(msg)?;
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);
        self.stream.write_all(&buf).await.context("tcp write")?;
        Ok(())
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .context("tcp read len")?;
        let len = u32::from_be_bytes(len_buf) as usize;
        ensure!(len <= MAX_FRAME_LEN, "frame too large: {len} bytes");
        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .await
            .context("tcp read payload")?;
        decode_from_bytes(&payload)
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }
}

/// Unreliable channel over UDP.
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

    /// Receives one raw datagram within the given timeout.
    ///
    /// Decoding is left to the caller so a malformed datagram can be dropped
    /// without tearing down the channel.
    pub async fn recv_raw_timeout(&self, timeout: Duration) -> anyhow::Result<Option<Bytes>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(Bytes::from(buf)))
            }
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
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

    #[test]
    fn snapshot_survives_codec() {
        let msg = NetMsg::PositionSnapshot(PositionSnapshot {
            entity: EntityId(7),
            x: 12.5,
            y: -3.0,
            seq: 42,
            held_secs: Some(0.25),
            timestamp_ms: 1000,
        });
        let back = decode_from_bytes(&encode_to_bytes(&msg).unwrap()).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn snapshot_without_held_time_decodes() -> anyhow::Result<()> {
        let raw = br#"{"PositionSnapshot":{"entity":7,"x":1.0,"y":2.0,"seq":3,"timestamp_ms":0}}"#;
        match decode_from_bytes(raw)? {
            NetMsg::PositionSnapshot(snap) => assert_eq!(snap.held_secs, None),
            other => anyhow::bail!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn snapshot_with_negative_seq_is_rejected() {
        let raw = br#"{"PositionSnapshot":{"entity":7,"x":1.0,"y":2.0,"seq":-1,"timestamp_ms":0}}"#;
        assert!(decode_from_bytes(raw).is_err());
    }

    #[test]
    fn snapshot_with_missing_fields_is_rejected() {
        let raw = br#"{"PositionSnapshot":{"entity":7,"x":1.0,"seq":3}}"#;
        assert!(decode_from_bytes(raw).is_err());
    }
}
