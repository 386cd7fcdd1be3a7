//! Server implementation.
//!
//! A reference authoritative server for the movement layer. It supports:
//! - Client connection handshake over TCP
//! - Sequenced movement input over UDP
//! - Fixed-step kinematic integration of each player's held input
//! - Per-tick position replication
//!
//! Clients only send input when it changes, so the server keeps applying
//! the last accepted input every tick. Each snapshot echoes that input's
//! `seq` together with how long it has been held; clients use the pair as
//! their reconciliation anchor. There is no collision, AI or persistence
//! here.
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Movement uses the same `movement::step` as client prediction.
//! - Bodies are stored in a `BTreeMap` so iteration order is stable.

use anyhow::Context;
use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};
use tilesync_shared::{
    config::EngineConfig,
    entity::{EntityAllocator, EntityId, EntityKind},
    math::Vec2,
    movement::{self, MovementInput},
    net::{
        decode_from_bytes, encode_to_bytes, ClientId, EntityPositionUpdate, InputCommand, NetMsg,
        PositionSnapshot, ReliableConn, ReliableListener, MAX_DATAGRAM_LEN, PROTOCOL_VERSION,
    },
};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Connected client state.
struct ClientSlot {
    reliable: ReliableConn,
    udp_peer: SocketAddr,
    /// Whether the client asked for replication.
    ready: bool,
    /// Entity this client controls.
    entity: EntityId,
    /// Input applied every tick until the next command arrives.
    held: MovementInput,
    /// `seq` of the last accepted input.
    last_seq: Option<u64>,
    /// Seconds `held` has been integrated since it was accepted.
    held_for: f32,
}

/// A simulated body.
#[derive(Debug, Clone, Copy)]
struct Body {
    kind: EntityKind,
    position: Vec2,
}

/// Game server.
pub struct GameServer {
    pub cfg: EngineConfig,
    bodies: BTreeMap<EntityId, Body>,
    clients: HashMap<ClientId, ClientSlot>,
    ids: EntityAllocator,
    next_client: u32,

    tcp: ReliableListener,
    udp: UdpSocket,

    tick: u32,
    started: Instant,
}

impl GameServer {
    /// Creates a new server with the given config.
    pub async fn new(cfg: EngineConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;
        Ok(Self::with_sockets(cfg, tcp, udp))
    }

    fn with_sockets(cfg: EngineConfig, tcp: ReliableListener, udp: UdpSocket) -> Self {
        let mut server = Self {
            bodies: BTreeMap::new(),
            clients: HashMap::new(),
            ids: EntityAllocator::default(),
            next_client: 1,
            tcp,
            udp,
            tick: 0,
            started: Instant::now(),
            cfg,
        };
        for pos in server.cfg.monster_spawns.clone() {
            server.spawn_static(EntityKind::Monster, pos);
        }
        server
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Current position of a body.
    pub fn position_of(&self, entity: EntityId) -> Option<Vec2> {
        self.bodies.get(&entity).map(|b| b.position)
    }

    /// Entity controlled by a client.
    pub fn entity_of(&self, client_id: ClientId) -> Option<EntityId> {
        self.clients.get(&client_id).map(|c| c.entity)
    }

    /// Adds a body that is replicated but never moved by the server.
    pub fn spawn_static(&mut self, kind: EntityKind, position: Vec2) -> EntityId {
        let id = self.ids.allocate();
        self.bodies.insert(id, Body { kind, position });
        debug!(entity = %id, ?kind, ?position, "Spawned static body");
        id
    }

    /// Accepts exactly one client (handshake).
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        match conn.recv().await? {
            NetMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {}
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
        let client_udp_port = match conn.recv().await? {
            NetMsg::UdpHello { client_udp_port } => client_udp_port,
            other => anyhow::bail!("expected UdpHello, got {other:?}"),
        };

        let id = ClientId(self.next_client);
        self.next_client += 1;
        let spawn = self.cfg.spawn;
        let entity = self.ids.allocate();
        conn.send(&NetMsg::Welcome {
            client_id: id,
            entity,
            spawn,
        })
        .await?;

        self.bodies.insert(
            entity,
            Body {
                kind: EntityKind::Player,
                position: spawn,
            },
        );

        let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
        self.clients.insert(
            id,
            ClientSlot {
                reliable: conn,
                udp_peer,
                ready: false,
                entity,
                held: MovementInput::IDLE,
                last_seq: None,
                held_for: 0.0,
            },
        );

        info!(client_id = ?id, entity = %entity, %udp_peer, "Client connected");
        Ok(id)
    }

    /// Marks a client as ready to receive replication.
    pub fn client_ready(&mut self, client_id: ClientId) -> anyhow::Result<()> {
        let client = self
            .clients
            .get_mut(&client_id)
            .context("client not found")?;
        client.ready = true;
        info!(client_id = ?client_id, entity = %client.entity, "Client ready");
        Ok(())
    }

    /// Drops a client, removes its body and tells everyone else.
    pub async fn kick(&mut self, client_id: ClientId, reason: &str) -> anyhow::Result<()> {
        let mut client = self
            .clients
            .remove(&client_id)
            .context("client not found")?;
        self.bodies.remove(&client.entity);

        if let Err(e) = client
            .reliable
            .send(&NetMsg::Disconnect {
                reason: reason.to_string(),
            })
            .await
        {
            debug!(client_id = ?client_id, error = %e, "Disconnect notice not delivered");
        }

        let removed = encode_to_bytes(&NetMsg::EntityRemoved { id: client.entity })?;
        for c in self.clients.values().filter(|c| c.ready) {
            let _ = self.udp.send_to(&removed, c.udp_peer).await;
        }
        info!(client_id = ?client_id, entity = %client.entity, reason, "Client kicked");
        Ok(())
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz as f32);
        let mut next = tokio::time::Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        self.recv_commands().await?;
        self.simulate(dt_sec);
        self.send_snapshots().await?;
        self.tick += 1;
        Ok(())
    }

    async fn recv_commands(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => match decode_from_bytes(&buf[..n]) {
                    Ok(msg) => self.handle_udp_message(from, msg),
                    Err(e) => warn!(%from, error = %e, "Dropping malformed datagram"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv")?,
            }
        }
        Ok(())
    }

    fn handle_udp_message(&mut self, from: SocketAddr, msg: NetMsg) {
        match msg {
            NetMsg::MoveInput(cmd) => {
                self.on_move_input(from, cmd);
            }
            NetMsg::ClientReady { client_id } => {
                if let Err(e) = self.client_ready(client_id) {
                    warn!(client_id = ?client_id, error = %e, "Failed to mark client ready");
                }
            }
            _ => {
                debug!(?msg, "Unexpected UDP message");
            }
        }
    }

    /// Applies a movement command. Commands that are not newer than the
    /// last accepted one are dropped, so reordered datagrams cannot roll the
    /// held input back.
    pub fn on_move_input(&mut self, from: SocketAddr, cmd: InputCommand) {
        let Some(c) = self.clients.get_mut(&cmd.client_id) else {
            debug!(client_id = ?cmd.client_id, "Input from unknown client");
            return;
        };
        if c.last_seq.is_some_and(|last| cmd.seq <= last) {
            debug!(client_id = ?cmd.client_id, seq = cmd.seq, "Dropping stale input");
            return;
        }
        c.udp_peer = from;
        c.held = cmd.input.normalized();
        c.last_seq = Some(cmd.seq);
        c.held_for = 0.0;
    }

    fn simulate(&mut self, dt_sec: f32) {
        let speed = self.cfg.movement.speed;
        for c in self.clients.values_mut() {
            if let Some(body) = self.bodies.get_mut(&c.entity) {
                body.position = movement::step(body.position, c.held, speed, dt_sec);
            }
            c.held_for += dt_sec;
        }
    }

    /// Authoritative snapshot for the entity a client controls.
    pub fn snapshot_for(&self, client_id: ClientId) -> Option<PositionSnapshot> {
        let c = self.clients.get(&client_id)?;
        let body = self.bodies.get(&c.entity)?;
        Some(PositionSnapshot {
            entity: c.entity,
            x: body.position.x,
            y: body.position.y,
            seq: c.last_seq.unwrap_or(0),
            held_secs: Some(c.held_for),
            timestamp_ms: self.started.elapsed().as_millis() as u64,
        })
    }

    async fn send_snapshots(&self) -> anyhow::Result<()> {
        let mut updates = Vec::with_capacity(self.bodies.len());
        for (&id, body) in &self.bodies {
            let msg = NetMsg::EntityPositionUpdate(EntityPositionUpdate {
                id,
                kind: body.kind,
                x: body.position.x,
                y: body.position.y,
            });
            updates.push((id, encode_to_bytes(&msg).context("serialize update")?));
        }

        for (&client_id, c) in self.clients.iter().filter(|(_, c)| c.ready) {
            if let Some(snap) = self.snapshot_for(client_id) {
                let payload = encode_to_bytes(&NetMsg::PositionSnapshot(snap))
                    .context("serialize snapshot")?;
                let _ = self.udp.send_to(&payload, c.udp_peer).await;
            }
            for (id, payload) in &updates {
                if *id != c.entity {
                    let _ = self.udp.send_to(payload, c.udp_peer).await;
                }
            }
        }
        Ok(())
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, EngineConfig)> {
    bind_ephemeral_with(EngineConfig {
        tick_hz,
        ..Default::default()
    })
    .await
}

/// Like [`bind_ephemeral`] but keeps the rest of `cfg`.
pub async fn bind_ephemeral_with(
    mut cfg: EngineConfig,
) -> anyhow::Result<(GameServer, EngineConfig)> {
    cfg.server_addr = format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

    // Bind TCP first to get an ephemeral port, then bind UDP to that same port.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = UdpSocket::bind(udp_bind).await?;

    Ok((GameServer::with_sockets(cfg.clone(), tcp, udp), cfg))
}
