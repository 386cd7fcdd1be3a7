use std::net::SocketAddr;

use anyhow::Context;
use tilesync_client::GameClient;
use tilesync_server::server::{bind_ephemeral, bind_ephemeral_with};
use tilesync_shared::{
    config::EngineConfig,
    entity::EntityId,
    math::Vec2,
    movement::MovementInput,
    net::InputCommand,
};

/// Smoke test: server can run a few ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(64).await?;
    server.run_for_ticks(3).await?;
    assert_eq!(server.tick(), 3);
    Ok(())
}

#[tokio::test]
async fn configured_monsters_are_spawned() -> anyhow::Result<()> {
    let (server, _cfg) = bind_ephemeral_with(EngineConfig {
        monster_spawns: vec![Vec2::new(10.0, 20.0), Vec2::new(-5.0, 0.0)],
        ..Default::default()
    })
    .await?;
    assert_eq!(server.position_of(EntityId(1)), Some(Vec2::new(10.0, 20.0)));
    assert_eq!(server.position_of(EntityId(2)), Some(Vec2::new(-5.0, 0.0)));
    assert_eq!(server.position_of(EntityId(3)), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_inputs_do_not_override_newer_ones() -> anyhow::Result<()> {
    tilesync_tests::init_tracing();

    let (mut server, cfg) = bind_ephemeral(20).await?;
    let accept = tokio::spawn(async move {
        let cid = server.accept_one().await?;
        Ok::<_, anyhow::Error>((server, cid))
    });
    let _client = GameClient::connect(&cfg).await?;
    let (mut server, cid) = accept.await??;

    let from: SocketAddr = "127.0.0.1:9".parse()?;
    let right = MovementInput {
        right: true,
        ..Default::default()
    };
    let left = MovementInput {
        left: true,
        ..Default::default()
    };
    server.on_move_input(
        from,
        InputCommand {
            client_id: cid,
            seq: 5,
            timestamp_ms: 80,
            input: right,
        },
    );
    // Arrives late, must be dropped.
    server.on_move_input(
        from,
        InputCommand {
            client_id: cid,
            seq: 3,
            timestamp_ms: 48,
            input: left,
        },
    );
    server.step(0.5).await?;

    let entity = server.entity_of(cid).context("client entity")?;
    let pos = server.position_of(entity).context("client body")?;
    assert!((pos.x - (cfg.spawn.x + 80.0)).abs() < 1e-3, "x = {}", pos.x);
    assert!((pos.y - cfg.spawn.y).abs() < 1e-3);
    Ok(())
}
