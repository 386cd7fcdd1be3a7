//! Interpolation.
//!
//! The server sends discrete positions for remote entities at its tick rate.
//! The client renders at its own rate and blends each remote entity toward
//! its latest network position.

use std::collections::HashMap;

use tilesync_shared::{config::InterpConfig, entity::EntityId, math::Vec2};

#[derive(Debug, Clone, Copy)]
struct Track {
    rendered: Vec2,
    target: Vec2,
}

/// Rendered positions of remote entities.
#[derive(Debug, Default)]
pub struct RemoteInterpolator {
    cfg: InterpConfig,
    tracks: HashMap<EntityId, Track>,
}

impl RemoteInterpolator {
    pub fn new(cfg: InterpConfig) -> Self {
        Self {
            cfg,
            tracks: HashMap::new(),
        }
    }

    /// Sets the network position for an entity. New entities and jumps
    /// longer than the teleport distance start at the target.
    pub fn set_target(&mut self, id: EntityId, target: Vec2) {
        let teleport = self.cfg.teleport_distance;
        self.tracks
            .entry(id)
            .and_modify(|t| {
                if t.rendered.distance(target) > teleport {
                    t.rendered = target;
                }
                t.target = target;
            })
            .or_insert(Track {
                rendered: target,
                target,
            });
    }

    pub fn remove(&mut self, id: EntityId) {
        self.tracks.remove(&id);
    }

    /// Advances every track by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        let t = (self.cfg.lerp_factor * dt * 60.0).min(1.0);
        for track in self.tracks.values_mut() {
            track.rendered = track.rendered.lerp(track.target, t);
        }
    }

    pub fn rendered(&self, id: EntityId) -> Option<Vec2> {
        self.tracks.get(&id).map(|t| t.rendered)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entity_starts_at_target() {
        let mut interp = RemoteInterpolator::new(InterpConfig::default());
        interp.set_target(EntityId(1), Vec2::new(10.0, 10.0));
        assert_eq!(interp.rendered(EntityId(1)), Some(Vec2::new(10.0, 10.0)));
    }

    #[test]
    fn small_moves_blend_and_large_moves_snap() {
        let mut interp = RemoteInterpolator::new(InterpConfig::default());
        let id = EntityId(1);
        interp.set_target(id, Vec2::ZERO);

        interp.set_target(id, Vec2::new(32.0, 0.0));
        interp.update(1.0 / 60.0);
        let x = interp.rendered(id).map(|p| p.x).unwrap_or_default();
        assert!(x > 0.0 && x < 32.0);

        interp.set_target(id, Vec2::new(5000.0, 0.0));
        assert_eq!(interp.rendered(id), Some(Vec2::new(5000.0, 0.0)));

        interp.remove(id);
        assert!(interp.is_empty());
    }
}
