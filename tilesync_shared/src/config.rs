//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files. Every section has
//! defaults so a config file only needs the keys it overrides.

use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    math::Vec2,
    render::{DetailFlags, LodTier},
};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Where new players appear (server only).
    #[serde(default)]
    pub spawn: Vec2,
    /// Static monster bodies replicated to every client (server only).
    #[serde(default)]
    pub monster_spawns: Vec<Vec2>,
    #[serde(default)]
    pub movement: MovementConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub interp: InterpConfig,
    #[serde(default)]
    pub lod: LodConfig,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    20
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            player_name: default_player_name(),
            spawn: Vec2::ZERO,
            monster_spawns: Vec::new(),
            movement: MovementConfig::default(),
            reconcile: ReconcileConfig::default(),
            interp: InterpConfig::default(),
            lod: LodConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        if let Err(e) = cfg.validate() {
            warn!(path = %path.display(), error = %e, "Rejected config");
            return Err(e);
        }
        info!(
            path = %path.display(),
            server = %cfg.server_addr,
            tick_hz = cfg.tick_hz,
            "Loaded config"
        );
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tick_hz > 0, "tick_hz must be positive");
        ensure!(
            self.movement.speed.is_finite() && self.movement.speed >= 0.0,
            "movement.speed must be a non-negative number"
        );
        ensure!(
            self.movement.input_buffer_capacity > 0,
            "movement.input_buffer_capacity must be positive"
        );
        self.lod.validate()
    }
}

/// Local movement and prediction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Movement speed in pixels per second.
    pub speed: f32,
    /// Number of unacknowledged inputs kept for replay.
    pub input_buffer_capacity: usize,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            speed: 160.0,
            input_buffer_capacity: 30,
        }
    }
}

/// Correction smoothing for the locally controlled entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Residual error (px) at or below which correction snaps and ends.
    pub correction_epsilon: f32,
    /// Per-frame blend factor at 60 fps.
    pub lerp_factor: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            correction_epsilon: 1.0,
            lerp_factor: 0.15,
        }
    }
}

/// Smoothing of remote entity positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpConfig {
    /// Per-frame blend factor at 60 fps.
    pub lerp_factor: f32,
    /// Jumps longer than this (px) snap instead of blending.
    pub teleport_distance: f32,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            lerp_factor: 0.2,
            teleport_distance: 256.0,
        }
    }
}

/// Distance bands (px from the camera center), ascending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodThresholds {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
    pub culled: f32,
}

impl Default for LodThresholds {
    fn default() -> Self {
        Self {
            high: 200.0,
            medium: 500.0,
            low: 800.0,
            culled: 1200.0,
        }
    }
}

impl LodThresholds {
    /// Bands in classification order.
    pub fn bands(&self) -> [(LodTier, f32); 4] {
        [
            (LodTier::High, self.high),
            (LodTier::Medium, self.medium),
            (LodTier::Low, self.low),
            (LodTier::Culled, self.culled),
        ]
    }
}

/// Render state applied to an entity when it enters a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub visible: bool,
    pub active: bool,
    pub alpha: f32,
    /// Show decorative sub-elements (shadows, nameplates, ...).
    pub decorative: bool,
    /// Keep animations playing.
    pub animate: bool,
}

impl TierPolicy {
    pub fn detail(&self) -> DetailFlags {
        let mut flags = DetailFlags::empty();
        flags.set(DetailFlags::DECORATIVE, self.decorative);
        flags.set(DetailFlags::ANIMATION, self.animate);
        flags
    }
}

/// One policy per tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierPolicies {
    pub high: TierPolicy,
    pub medium: TierPolicy,
    pub low: TierPolicy,
    pub culled: TierPolicy,
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self {
            high: TierPolicy {
                visible: true,
                active: true,
                alpha: 1.0,
                decorative: true,
                animate: true,
            },
            medium: TierPolicy {
                visible: true,
                active: true,
                alpha: 1.0,
                decorative: false,
                animate: true,
            },
            low: TierPolicy {
                visible: true,
                active: true,
                alpha: 0.8,
                decorative: false,
                animate: false,
            },
            culled: TierPolicy {
                visible: false,
                active: false,
                alpha: 0.0,
                decorative: false,
                animate: false,
            },
        }
    }
}

/// Level-of-detail scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Wall-clock interval between passes.
    pub update_interval_ms: u64,
    /// Padding (px) added around the camera rectangle before culling.
    pub viewport_margin: f32,
    pub thresholds: LodThresholds,
    pub policies: TierPolicies,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 100,
            viewport_margin: 100.0,
            thresholds: LodThresholds::default(),
            policies: TierPolicies::default(),
        }
    }
}

impl LodConfig {
    pub fn policy_for(&self, tier: LodTier) -> &TierPolicy {
        match tier {
            LodTier::High => &self.policies.high,
            LodTier::Medium => &self.policies.medium,
            LodTier::Low => &self.policies.low,
            LodTier::Culled => &self.policies.culled,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let t = &self.thresholds;
        ensure!(
            0.0 <= t.high && t.high <= t.medium && t.medium <= t.low && t.low <= t.culled,
            "lod thresholds must be ascending, got {t:?}"
        );
        ensure!(
            self.viewport_margin.is_finite() && self.viewport_margin >= 0.0,
            "lod.viewport_margin must be a non-negative number"
        );
        Ok(())
    }
}
