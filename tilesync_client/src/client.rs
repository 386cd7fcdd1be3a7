//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake + disconnect notices)
//! - An unreliable datagram socket (inputs out, snapshots in)
//! - A [`ClientSession`] holding prediction, reconciliation and LOD state

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use anyhow::Context;
use tilesync_shared::{
    config::EngineConfig,
    net::{decode_from_bytes, ClientId, NetMsg, ReliableConn, UnreliableConn, PROTOCOL_VERSION},
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{
    input::RawInput,
    lod::{Camera, LodPass},
    session::{ClientSession, FrameOutput},
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, replication not requested yet.
    Connected,
    /// Receiving replication.
    Ready,
    /// Server closed the session or the control stream failed.
    Disconnected,
}

/// High-level game client.
pub struct GameClient {
    pub state: ClientState,
    pub session: ClientSession,

    reliable: ReliableConn,
    unreliable: UnreliableConn,
}

impl GameClient {
    /// Connects to a server and performs handshake.
    pub async fn connect(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, name = %cfg.player_name, "Connecting to server");

        // Bind UDP first so we can tell the server where to send snapshots.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let unreliable = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let (client_id, entity, spawn) = match reliable.recv().await? {
            NetMsg::Welcome {
                client_id,
                entity,
                spawn,
            } => (client_id, entity, spawn),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(client_id = ?client_id, entity = %entity, ?spawn, "Connected to server");

        Ok(Self {
            state: ClientState::Connected,
            session: ClientSession::new(client_id, entity, spawn, cfg),
            reliable,
            unreliable,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.session.client_id()
    }

    /// Asks the server to start replication.
    pub async fn send_ready(&mut self) -> anyhow::Result<()> {
        self.unreliable
            .send(&NetMsg::ClientReady {
                client_id: self.client_id(),
            })
            .await?;
        self.state = ClientState::Ready;
        info!("Sent ready signal to server");
        Ok(())
    }

    /// Runs one local frame and sends the input if it changed.
    pub async fn frame(&mut self, raw: RawInput, dt: f32) -> anyhow::Result<FrameOutput> {
        let out = self.session.frame(raw, dt);
        if let Some(cmd) = out.outbound {
            self.unreliable.send(&NetMsg::MoveInput(cmd)).await?;
            debug!(seq = cmd.seq, input = ?cmd.input, "Sent input");
        }
        Ok(out)
    }

    /// Drains datagrams that arrive within `timeout` into the session.
    /// Returns how many messages were applied.
    pub async fn poll_unreliable(&mut self, timeout: Duration) -> anyhow::Result<usize> {
        let mut applied = 0;
        let mut wait = timeout;
        while let Some(datagram) = self.unreliable.recv_raw_timeout(wait).await? {
            match decode_from_bytes(&datagram) {
                Ok(msg) => {
                    self.session.handle_message(msg);
                    applied += 1;
                }
                Err(e) => {
                    warn!(error = %e, len = datagram.len(), "Dropping malformed datagram");
                }
            }
            // Only the first read waits; the rest drain what is queued.
            wait = Duration::from_millis(1);
        }
        Ok(applied)
    }

    /// Polls the reliable connection for control messages.
    pub async fn poll_reliable(&mut self) -> anyhow::Result<()> {
        match tokio::time::timeout(Duration::from_millis(1), self.reliable.recv()).await {
            Ok(Ok(NetMsg::Disconnect { reason })) => {
                info!(reason = %reason, "Disconnected from server");
                self.state = ClientState::Disconnected;
            }
            Ok(Ok(other)) => {
                debug!(?other, "Unhandled reliable message");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Reliable connection error");
                self.state = ClientState::Disconnected;
            }
            Err(_) => {
                // Timeout, no message available.
            }
        }
        Ok(())
    }

    pub fn update_lod(&mut self, now: Instant, camera: &Camera) -> Option<LodPass> {
        self.session.update_lod(now, camera)
    }

    /// Returns the underlying reliable connection peer.
    pub fn server_peer(&self) -> anyhow::Result<SocketAddr> {
        self.reliable.peer_addr()
    }
}
