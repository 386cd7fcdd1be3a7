//! Full socket-based integration tests for client ↔ server communication.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tilesync_client::client::ClientState;
use tilesync_client::input::RawInput;
use tilesync_client::GameClient;
use tilesync_server::server::{bind_ephemeral, bind_ephemeral_with};
use tilesync_shared::config::EngineConfig;
use tilesync_shared::entity::{EntityId, EntityKind};
use tilesync_shared::math::Vec2;
use tilesync_shared::movement::MovementInput;
use tilesync_shared::net::{
    decode_from_bytes, encode_to_bytes, ClientId, EntityPositionUpdate, InputCommand, NetMsg,
    PositionSnapshot, PROTOCOL_VERSION,
};

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let msgs = [
        NetMsg::Hello {
            protocol: PROTOCOL_VERSION,
        },
        NetMsg::UdpHello {
            client_udp_port: 50000,
        },
        NetMsg::Welcome {
            client_id: ClientId(1),
            entity: EntityId(4),
            spawn: Vec2::new(32.0, 64.0),
        },
        NetMsg::MoveInput(InputCommand {
            client_id: ClientId(1),
            seq: 17,
            timestamp_ms: 272,
            input: MovementInput {
                up: true,
                left: true,
                ..Default::default()
            },
        }),
        NetMsg::PositionSnapshot(PositionSnapshot {
            entity: EntityId(4),
            x: 10.5,
            y: -3.25,
            seq: 17,
            held_secs: Some(0.1),
            timestamp_ms: 300,
        }),
        NetMsg::EntityPositionUpdate(EntityPositionUpdate {
            id: EntityId(9),
            kind: EntityKind::Monster,
            x: 1.0,
            y: 2.0,
        }),
    ];
    for msg in msgs {
        assert_eq!(decode_from_bytes(&encode_to_bytes(&msg)?)?, msg);
    }
    Ok(())
}

const FRAME: f32 = 1.0 / 60.0;

fn right() -> RawInput {
    RawInput {
        right: true,
        ..Default::default()
    }
}

/// Full integration: spawn server, connect client, exchange inputs/snapshots.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_server_full_roundtrip() -> anyhow::Result<()> {
    tilesync_tests::init_tracing();

    // Bind server to ephemeral port with one static monster.
    let (mut server, cfg) = bind_ephemeral_with(EngineConfig {
        tick_hz: 64,
        monster_spawns: vec![Vec2::new(120.0, 40.0)],
        ..Default::default()
    })
    .await?;

    // Spawn server accept + step loop in background.
    let server_handle = tokio::spawn(async move {
        let cid = server.accept_one().await?;
        for _ in 0..20 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, anyhow::Error>((server, cid))
    });

    // Give server a moment to start listening.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut client = GameClient::connect(&cfg).await?;
    client.send_ready().await?;
    assert_eq!(client.state, ClientState::Ready);

    let mut received = 0;
    for _ in 0..200 {
        if server_handle.is_finished() {
            break;
        }
        client.frame(right(), 1.0 / 60.0).await?;
        received += client.poll_unreliable(Duration::from_millis(5)).await?;
    }
    received += client.poll_unreliable(Duration::from_millis(20)).await?;

    let (server, cid) = server_handle.await??;

    assert!(received > 0, "client should have received datagrams");

    // The only command sent was the first frame's edge, seq 1.
    assert_eq!(client.session.reconciler().last_applied_seq(), Some(1));

    let entity = server.entity_of(cid).context("client entity")?;
    assert_eq!(entity, client.session.entity());
    let pos = server.position_of(entity).context("client body")?;
    assert!(pos.x > cfg.spawn.x, "server should have moved the player");

    // The monster is tracked for LOD, the player itself is not.
    let registry = client.session.registry();
    assert_eq!(registry.len(), 1);
    let monster = registry.iter().next().context("monster record")?;
    assert_eq!(monster.kind(), EntityKind::Monster);
    assert_eq!(monster.position(), Vec2::new(120.0, 40.0));
    assert!(client.session.remote_position(monster.id()).is_some());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn kicked_player_disappears_for_others() -> anyhow::Result<()> {
    tilesync_tests::init_tracing();

    let (mut server, cfg) = bind_ephemeral_with(EngineConfig {
        tick_hz: 64,
        ..Default::default()
    })
    .await?;

    let server_handle = tokio::spawn(async move {
        let first = server.accept_one().await?;
        let _second = server.accept_one().await?;
        for _ in 0..10 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        server.kick(first, "test over").await?;
        for _ in 0..10 {
            server.step(1.0 / 64.0).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut a = GameClient::connect(&cfg).await?;
    let mut b = GameClient::connect(&cfg).await?;
    // Ids come from the server instance, not the process.
    assert_eq!((a.client_id(), b.client_id()), (ClientId(1), ClientId(2)));
    a.send_ready().await?;
    b.send_ready().await?;

    let mut saw_a = false;
    for _ in 0..400 {
        if server_handle.is_finished() {
            break;
        }
        a.frame(right(), 1.0 / 60.0).await?;
        b.frame(RawInput::default(), 1.0 / 60.0).await?;
        a.poll_unreliable(Duration::from_millis(2)).await?;
        b.poll_unreliable(Duration::from_millis(2)).await?;
        if a.state != ClientState::Disconnected {
            a.poll_reliable().await?;
        }
        saw_a |= b.session.registry().contains(a.session.entity());
    }
    b.poll_unreliable(Duration::from_millis(20)).await?;
    server_handle.await??;

    assert!(saw_a, "second client should have tracked the first one");
    assert_eq!(a.state, ClientState::Disconnected);
    assert!(!b.session.registry().contains(a.session.entity()));
    assert_eq!(b.session.remote_position(a.session.entity()), None);
    Ok(())
}

/// Drives the session and the server in lockstep, delivering snapshots
/// with a delay, and checks the prediction never runs ahead of the path
/// the server is integrating while a key is held.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_input_prediction_tracks_server() -> anyhow::Result<()> {
    tilesync_tests::init_tracing();

    let (mut server, cfg) = bind_ephemeral(20).await?;
    let accept = tokio::spawn(async move {
        let cid = server.accept_one().await?;
        Ok::<_, anyhow::Error>((server, cid))
    });
    let mut client = GameClient::connect(&cfg).await?;
    let (mut server, cid) = accept.await??;
    let from: SocketAddr = "127.0.0.1:9".parse()?;
    let speed = cfg.movement.speed;

    // Half a second of input before the server runs at all.
    for _ in 0..30 {
        if let Some(cmd) = client.session.frame(right(), FRAME).outbound {
            server.on_move_input(from, cmd);
        }
    }
    for _ in 0..10 {
        server.step(0.05).await?;
    }
    let snap = server.snapshot_for(cid).context("snapshot")?;
    assert!((snap.x - 80.0).abs() < 1e-3, "server x = {}", snap.x);
    client.session.handle_message(NetMsg::PositionSnapshot(snap));
    let predicted = client.session.reconciler().predicted();
    assert!((predicted.x - snap.x).abs() < 0.01, "predicted x = {}", predicted.x);

    // Keep holding; each tick covers three frames and snapshots arrive two
    // ticks late.
    let mut in_flight = VecDeque::new();
    let mut frames = 30u32;
    for _ in 0..20 {
        for _ in 0..3 {
            client.session.frame(right(), FRAME);
            frames += 1;
        }
        server.step(0.05).await?;
        in_flight.push_back(server.snapshot_for(cid).context("snapshot")?);
        if in_flight.len() > 2 {
            if let Some(late) = in_flight.pop_front() {
                client.session.handle_message(NetMsg::PositionSnapshot(late));
            }
        }
        let own_path = frames as f32 * speed * FRAME;
        let predicted = client.session.reconciler().predicted();
        assert!(
            (predicted.x - own_path).abs() < 0.05,
            "frame {frames}: predicted x = {}, expected {own_path}",
            predicted.x
        );
    }

    // Release and let everything land.
    for _ in 0..3 {
        if let Some(cmd) = client.session.frame(RawInput::default(), FRAME).outbound {
            server.on_move_input(from, cmd);
        }
    }
    server.step(0.05).await?;
    in_flight.push_back(server.snapshot_for(cid).context("snapshot")?);
    for snap in in_flight {
        client.session.handle_message(NetMsg::PositionSnapshot(snap));
    }

    let entity = server.entity_of(cid).context("client entity")?;
    let server_pos = server.position_of(entity).context("client body")?;
    assert!((server_pos.x - 240.0).abs() < 1e-2, "server x = {}", server_pos.x);
    let predicted = client.session.reconciler().predicted();
    assert!(predicted.distance(server_pos) < 0.05, "predicted {predicted:?}");
    assert_eq!(client.session.reconciler().rendered(), predicted);
    Ok(())
}
