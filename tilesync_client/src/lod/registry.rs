//! Entity registry.
//!
//! Owning table from entity id to LOD record. `add`, `remove` and
//! `update_position` are the only mutators reachable from outside the LOD
//! module; tier and visibility are written by the scheduler alone.

use std::{collections::HashMap, fmt, time::Instant};

use tilesync_shared::{
    entity::{EntityId, EntityKind},
    math::Vec2,
    render::{DetailProfile, LodTier, RenderHandle},
};
use tracing::debug;

/// LOD record for one networked game object.
pub struct LodEntity {
    id: EntityId,
    kind: EntityKind,
    position: Vec2,
    tier: LodTier,
    visible: bool,
    last_tier_change_at: Instant,
    profile: DetailProfile,
    handle: Box<dyn RenderHandle>,
}

impl LodEntity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn tier(&self) -> LodTier {
        self.tier
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn last_tier_change_at(&self) -> Instant {
        self.last_tier_change_at
    }

    pub fn profile(&self) -> &DetailProfile {
        &self.profile
    }

    pub(super) fn set_tier(&mut self, tier: LodTier, visible: bool, now: Instant) {
        self.tier = tier;
        self.visible = visible;
        self.last_tier_change_at = now;
    }

    pub(super) fn parts_mut(&mut self) -> (&DetailProfile, &mut dyn RenderHandle) {
        (&self.profile, self.handle.as_mut())
    }
}

impl fmt::Debug for LodEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LodEntity")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("position", &self.position)
            .field("tier", &self.tier)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

/// Aggregate tier counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LodStats {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub culled: usize,
    pub visible: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, LodEntity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking an entity, replacing any existing record for `id`.
    ///
    /// New records start at [`LodTier::High`] and visible, the state a
    /// freshly created render object is in; the next scheduler pass moves
    /// them to their real tier.
    pub fn add(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        position: Vec2,
        profile: DetailProfile,
        handle: Box<dyn RenderHandle>,
    ) {
        let entity = LodEntity {
            id,
            kind,
            position,
            tier: LodTier::High,
            visible: true,
            last_tier_change_at: Instant::now(),
            profile,
            handle,
        };
        if self.entities.insert(id, entity).is_some() {
            debug!(entity = %id, "Replaced existing LOD record");
        }
    }

    /// Stops tracking an entity. Unknown ids are a no-op.
    pub fn remove(&mut self, id: EntityId) -> Option<LodEntity> {
        self.entities.remove(&id)
    }

    /// Records the latest network position. Returns `false` for unknown ids.
    pub fn update_position(&mut self, id: EntityId, position: Vec2) -> bool {
        match self.entities.get_mut(&id) {
            Some(e) => {
                e.position = position;
                true
            }
            None => {
                debug!(entity = %id, "Position update for untracked entity");
                false
            }
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&LodEntity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LodEntity> {
        self.entities.values()
    }

    pub(super) fn iter_mut(&mut self) -> impl Iterator<Item = &mut LodEntity> {
        self.entities.values_mut()
    }

    /// Counts entities per tier from their current state.
    pub fn stats(&self) -> LodStats {
        let mut stats = LodStats::default();
        for e in self.entities.values() {
            match e.tier {
                LodTier::High => stats.high += 1,
                LodTier::Medium => stats.medium += 1,
                LodTier::Low => stats.low += 1,
                LodTier::Culled => stats.culled += 1,
            }
            if e.visible {
                stats.visible += 1;
            }
            stats.total += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilesync_shared::render::NullHandle;

    fn add(reg: &mut EntityRegistry, id: u64, pos: Vec2) {
        reg.add(
            EntityId(id),
            EntityKind::Monster,
            pos,
            DetailProfile::monster(),
            Box::new(NullHandle),
        );
    }

    #[test]
    fn add_update_remove_lifecycle() {
        let mut reg = EntityRegistry::new();
        add(&mut reg, 1, Vec2::ZERO);
        assert!(reg.update_position(EntityId(1), Vec2::new(5.0, 6.0)));
        assert_eq!(reg.get(EntityId(1)).map(|e| e.position()), Some(Vec2::new(5.0, 6.0)));

        assert!(reg.remove(EntityId(1)).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let mut reg = EntityRegistry::new();
        assert!(reg.remove(EntityId(9)).is_none());
        assert!(!reg.update_position(EntityId(9), Vec2::ZERO));
        assert!(!reg.contains(EntityId(9)));
    }

    #[test]
    fn re_adding_replaces_record() {
        let mut reg = EntityRegistry::new();
        add(&mut reg, 1, Vec2::ZERO);
        add(&mut reg, 1, Vec2::new(1.0, 1.0));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(EntityId(1)).map(|e| e.position()), Some(Vec2::new(1.0, 1.0)));
    }

    #[test]
    fn stats_count_each_entity_once() {
        let mut reg = EntityRegistry::new();
        add(&mut reg, 1, Vec2::ZERO);
        add(&mut reg, 2, Vec2::ZERO);
        let stats = reg.stats();
        assert_eq!(stats.high, 2);
        assert_eq!(stats.visible, 2);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.high + stats.medium + stats.low + stats.culled, stats.total);
    }
}
