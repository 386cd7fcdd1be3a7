//! Standalone headless client binary.
//!
//! Usage:
//!   cargo run -p tilesync_client -- [--config tilesync.json]
//!       [--addr 127.0.0.1:40000] [--name Player]
//!
//! The client connects to the server, walks a scripted square path, reconciles
//! against snapshots and runs LOD scheduling for a virtual 800x600 camera that
//! follows the player.

use std::env;
use std::time::{Duration, Instant};

use anyhow::Context;
use tilesync_client::client::{ClientState, GameClient};
use tilesync_client::input::RawInput;
use tilesync_client::lod::Camera;
use tilesync_shared::config::EngineConfig;
use tracing::{debug, info};

const FRAME_HZ: f32 = 60.0;

fn parse_args() -> anyhow::Result<EngineConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => EngineConfig::load(&args[i + 1])?,
        _ => EngineConfig::default(),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Walks right, down, left, up for two seconds each.
fn scripted_input(frame: u64) -> RawInput {
    let leg = (frame / (2 * FRAME_HZ as u64)) % 4;
    RawInput {
        right: leg == 0,
        down: leg == 1,
        left: leg == 2,
        up: leg == 3,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;
    client.send_ready().await?;

    let frame_interval = Duration::from_secs_f32(1.0 / FRAME_HZ);
    let mut next_frame = tokio::time::Instant::now();
    let mut last_frame = Instant::now();
    let mut frame: u64 = 0;

    loop {
        client.poll_reliable().await?;
        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        let out = client.frame(scripted_input(frame), dt).await?;
        client.poll_unreliable(Duration::from_millis(1)).await?;

        let camera = Camera::centered_on(out.rendered, 800.0, 600.0);
        client.update_lod(now, &camera);
        for change in client.session.drain_tier_changes() {
            info!(entity = %change.id, from = %change.from, to = %change.to, "Tier changed");
        }
        for r in client.session.drain_reconciled() {
            debug!(seq = r.seq, error = r.error, state = ?r.state, "Reconciled");
        }

        if frame % FRAME_HZ as u64 == 0 {
            let stats = client.session.lod_stats();
            info!(
                x = out.rendered.x,
                y = out.rendered.y,
                seq = out.seq,
                acked = ?client.session.reconciler().last_applied_seq(),
                visible = stats.visible,
                tracked = stats.total,
                "Client status"
            );
        }

        frame += 1;
        next_frame += frame_interval;
        tokio::time::sleep_until(next_frame).await;
    }

    Ok(())
}
