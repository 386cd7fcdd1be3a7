//! Rendering abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! Render objects are reached through [`RenderHandle`], a capability
//! interface the host implements on top of whatever scene graph it uses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, EntityKind};

/// Detail tier assigned by the LOD scheduler.
///
/// Variants are declared in order of increasing distance and strictly
/// decreasing detail, so `High < Medium < Low < Culled`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum LodTier {
    #[default]
    High,
    Medium,
    Low,
    Culled,
}

impl LodTier {
    pub const ALL: [LodTier; 4] = [LodTier::High, LodTier::Medium, LodTier::Low, LodTier::Culled];

    /// Larger is more detailed.
    pub fn detail_rank(self) -> u8 {
        match self {
            LodTier::High => 3,
            LodTier::Medium => 2,
            LodTier::Low => 1,
            LodTier::Culled => 0,
        }
    }
}

impl fmt::Display for LodTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LodTier::High => "high",
            LodTier::Medium => "medium",
            LodTier::Low => "low",
            LodTier::Culled => "culled",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Optional detail enabled at a tier.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DetailFlags: u8 {
        const DECORATIVE = 1 << 0; // Shadows, nameplates, particles
        const ANIMATION = 1 << 1;  // Sprite animation playback
    }
}

/// Whether a sub-element survives detail reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetailClass {
    /// Always shown while the entity is visible.
    Essential,
    /// Hidden when the tier drops [`DetailFlags::DECORATIVE`].
    Decorative,
}

/// A named sub-element of a render object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailElement {
    pub name: String,
    pub class: DetailClass,
}

impl DetailElement {
    pub fn essential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: DetailClass::Essential,
        }
    }

    pub fn decorative(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: DetailClass::Decorative,
        }
    }
}

/// Declares which parts of a render object can be reduced.
///
/// Supplied when an entity is registered so detail reduction never has to
/// inspect the concrete render object type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DetailProfile {
    pub elements: Vec<DetailElement>,
    /// Whether the object plays animations that can be paused.
    pub animated: bool,
}

impl DetailProfile {
    pub fn player() -> Self {
        Self {
            elements: vec![
                DetailElement::essential("sprite"),
                DetailElement::decorative("shadow"),
                DetailElement::decorative("nameplate"),
                DetailElement::essential("health_bar"),
            ],
            animated: true,
        }
    }

    pub fn monster() -> Self {
        Self {
            elements: vec![
                DetailElement::essential("sprite"),
                DetailElement::decorative("shadow"),
                DetailElement::decorative("health_bar"),
            ],
            animated: true,
        }
    }

    pub fn effect() -> Self {
        Self {
            elements: vec![DetailElement::decorative("particles")],
            animated: false,
        }
    }

    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Player => Self::player(),
            EntityKind::Monster => Self::monster(),
            EntityKind::Effect => Self::effect(),
        }
    }

    pub fn decorative(&self) -> impl Iterator<Item = &DetailElement> {
        self.elements
            .iter()
            .filter(|e| e.class == DetailClass::Decorative)
    }
}

/// Capabilities the LOD scheduler needs from a render object.
pub trait RenderHandle: Send {
    fn set_visible(&mut self, visible: bool);
    fn set_active(&mut self, active: bool);
    fn set_alpha(&mut self, alpha: f32);

    fn set_element_visible(&mut self, _element: &str, _visible: bool) {}
    fn set_animation_paused(&mut self, _paused: bool) {}
}

/// Creates render objects for entities entering network-tracked state.
pub trait HandleFactory: Send {
    fn create(&mut self, id: EntityId, kind: EntityKind) -> Box<dyn RenderHandle>;
}

/// A no-op handle useful for headless hosts and tests.
#[derive(Debug, Default)]
pub struct NullHandle;

impl RenderHandle for NullHandle {
    fn set_visible(&mut self, _visible: bool) {}
    fn set_active(&mut self, _active: bool) {}
    fn set_alpha(&mut self, _alpha: f32) {}
}

impl HandleFactory for NullHandle {
    fn create(&mut self, _id: EntityId, _kind: EntityKind) -> Box<dyn RenderHandle> {
        Box::new(NullHandle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_order_by_decreasing_detail() {
        let mut sorted = LodTier::ALL;
        sorted.sort();
        assert_eq!(sorted, LodTier::ALL);
        assert!(LodTier::ALL
            .windows(2)
            .all(|w| w[0].detail_rank() > w[1].detail_rank()));
    }

    #[test]
    fn profile_lists_decorative_elements() {
        let profile = DetailProfile::player();
        let names: Vec<&str> = profile
            .decorative()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["shadow", "nameplate"]);
    }
}
