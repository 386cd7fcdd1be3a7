//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p tilesync_server -- [--config tilesync.json]
//!       [--addr 127.0.0.1:40000] [--tick-hz 20]
//!
//! The server listens for client connections, runs a fixed timestep simulation,
//! and sends positions to connected clients every tick.

use std::env;
use std::time::Duration;

use anyhow::Context;
use tilesync_server::server::GameServer;
use tilesync_shared::config::EngineConfig;
use tracing::{info, warn};

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
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        monsters = cfg.monster_spawns.len(),
        "Starting server"
    );

    let mut server = GameServer::new(cfg.clone()).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let tick_interval = Duration::from_secs_f32(1.0 / cfg.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new clients (non-blocking).
        match server.try_accept(Duration::from_millis(1)).await {
            Ok(Some(cid)) => info!(client_id = ?cid, "New client accepted"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Handshake failed"),
        }

        server.step(tick_interval.as_secs_f32()).await?;

        if server.tick() % (cfg.tick_hz * 10).max(1) == 0 {
            info!(tick = server.tick(), clients = server.client_count(), "Status");
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
