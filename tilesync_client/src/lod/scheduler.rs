//! LOD scheduler.
//!
//! Tier assignment is O(n) in tracked entities, so it runs on a fixed
//! wall-clock interval rather than every frame. Classification is a pure
//! function of position, camera and config; render side effects and
//! [`TierChanged`] events are produced only when the tier actually changes.

use std::time::{Duration, Instant};

use tilesync_shared::{
    config::{LodConfig, TierPolicy},
    entity::EntityId,
    event::EventBus,
    math::Vec2,
    render::{DetailClass, DetailFlags, DetailProfile, LodTier, RenderHandle},
};
use tracing::{debug, info};

use super::{Camera, EntityRegistry};

/// Published once per tier transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierChanged {
    pub id: EntityId,
    pub from: LodTier,
    pub to: LodTier,
    pub visible: bool,
}

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LodPass {
    pub evaluated: usize,
    pub transitions: usize,
}

/// Tier for an entity at `position` seen by `camera`.
///
/// Anything outside the padded viewport is culled regardless of distance.
/// Inside it, the first distance band the distance falls under wins.
pub fn classify(position: Vec2, camera: &Camera, cfg: &LodConfig) -> LodTier {
    let view = camera.rect().padded(cfg.viewport_margin);
    if !view.contains(position) {
        return LodTier::Culled;
    }
    let distance = position.distance(camera.center());
    cfg.thresholds
        .bands()
        .into_iter()
        .find(|&(_, limit)| distance < limit)
        .map_or(LodTier::Culled, |(tier, _)| tier)
}

fn apply_policy(profile: &DetailProfile, handle: &mut dyn RenderHandle, policy: &TierPolicy) {
    handle.set_visible(policy.visible);
    handle.set_active(policy.active);
    handle.set_alpha(policy.alpha);

    let detail = policy.detail();
    let show_decorative = policy.visible && detail.contains(DetailFlags::DECORATIVE);
    for element in &profile.elements {
        let shown = match element.class {
            DetailClass::Essential => policy.visible,
            DetailClass::Decorative => show_decorative,
        };
        handle.set_element_visible(&element.name, shown);
    }
    if profile.animated {
        handle.set_animation_paused(!detail.contains(DetailFlags::ANIMATION));
    }
}

#[derive(Debug)]
pub struct LodScheduler {
    cfg: LodConfig,
    last_run: Option<Instant>,
}

impl LodScheduler {
    pub fn new(cfg: LodConfig) -> Self {
        Self {
            cfg,
            last_run: None,
        }
    }

    pub fn config(&self) -> &LodConfig {
        &self.cfg
    }

    /// Thresholds, margin and interval may be changed at any time; the next
    /// pass uses the new values.
    pub fn config_mut(&mut self) -> &mut LodConfig {
        &mut self.cfg
    }

    pub fn set_config(&mut self, cfg: LodConfig) {
        info!(
            interval_ms = cfg.update_interval_ms,
            margin = cfg.viewport_margin,
            thresholds = ?cfg.thresholds,
            "LOD config updated"
        );
        self.cfg = cfg;
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.cfg.update_interval_ms)
    }

    /// Makes the next [`on_tick`](Self::on_tick) run a pass immediately.
    pub fn force_update(&mut self) {
        self.last_run = None;
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.last_run
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval())
    }

    /// Runs a pass if the interval has elapsed since the last one.
    pub fn on_tick(
        &mut self,
        now: Instant,
        camera: &Camera,
        registry: &mut EntityRegistry,
        events: &mut EventBus,
    ) -> Option<LodPass> {
        if !self.is_due(now) {
            return None;
        }
        Some(self.run_pass(now, camera, registry, events))
    }

    /// Recomputes every tier now.
    pub fn run_pass(
        &mut self,
        now: Instant,
        camera: &Camera,
        registry: &mut EntityRegistry,
        events: &mut EventBus,
    ) -> LodPass {
        self.last_run = Some(now);
        let mut pass = LodPass::default();

        for entity in registry.iter_mut() {
            pass.evaluated += 1;
            let tier = classify(entity.position(), camera, &self.cfg);
            let from = entity.tier();
            if tier == from {
                continue;
            }

            let policy = self.cfg.policy_for(tier);
            let (profile, handle) = entity.parts_mut();
            apply_policy(profile, handle, policy);
            entity.set_tier(tier, policy.visible, now);
            pass.transitions += 1;

            events.push(TierChanged {
                id: entity.id(),
                from,
                to: tier,
                visible: policy.visible,
            });
        }

        if pass.transitions > 0 {
            debug!(
                evaluated = pass.evaluated,
                transitions = pass.transitions,
                "LOD pass"
            );
        }
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::centered_on(Vec2::ZERO, 2400.0, 2400.0)
    }

    #[test]
    fn distance_bands_are_ascending() {
        let cfg = LodConfig::default();
        let at = |x: f32| classify(Vec2::new(x, 0.0), &camera(), &cfg);
        assert_eq!(at(0.0), LodTier::High);
        assert_eq!(at(199.9), LodTier::High);
        assert_eq!(at(200.0), LodTier::Medium);
        assert_eq!(at(499.0), LodTier::Medium);
        assert_eq!(at(500.0), LodTier::Low);
        assert_eq!(at(800.0), LodTier::Culled);
        assert_eq!(at(1199.0), LodTier::Culled);
    }

    #[test]
    fn increasing_distance_never_increases_detail() {
        let cfg = LodConfig::default();
        let mut previous = LodTier::High;
        for step in 0..300 {
            let tier = classify(Vec2::new(step as f32 * 5.0, 0.0), &camera(), &cfg);
            assert!(tier >= previous, "{tier} after {previous} at step {step}");
            previous = tier;
        }
    }

    #[test]
    fn viewport_wins_over_distance() {
        let cfg = LodConfig {
            viewport_margin: 0.0,
            ..LodConfig::default()
        };
        // 50px from the center but outside a tiny camera.
        let small = Camera::centered_on(Vec2::ZERO, 40.0, 40.0);
        assert_eq!(classify(Vec2::new(50.0, 0.0), &small, &cfg), LodTier::Culled);
        assert_eq!(classify(Vec2::new(10.0, 0.0), &small, &cfg), LodTier::High);
    }

    #[test]
    fn classification_is_idempotent() {
        let cfg = LodConfig::default();
        let p = Vec2::new(321.0, -87.0);
        assert_eq!(classify(p, &camera(), &cfg), classify(p, &camera(), &cfg));
    }

    #[test]
    fn runs_on_interval_or_when_forced() {
        let mut sched = LodScheduler::new(LodConfig::default());
        let mut reg = EntityRegistry::new();
        let mut events = EventBus::new();
        let t0 = Instant::now();

        assert!(sched.on_tick(t0, &camera(), &mut reg, &mut events).is_some());
        assert!(sched
            .on_tick(t0 + Duration::from_millis(50), &camera(), &mut reg, &mut events)
            .is_none());
        assert!(sched
            .on_tick(t0 + Duration::from_millis(100), &camera(), &mut reg, &mut events)
            .is_some());

        sched.force_update();
        assert!(sched
            .on_tick(t0 + Duration::from_millis(101), &camera(), &mut reg, &mut events)
            .is_some());
    }
}
