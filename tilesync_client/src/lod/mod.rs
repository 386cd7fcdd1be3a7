//! Level-of-detail management for networked entities.
//!
//! [`EntityRegistry`] owns one [`LodEntity`] per tracked object and
//! [`LodScheduler`] periodically reassigns their [`LodTier`] from the camera
//! position, applying render side effects only on tier transitions.

mod registry;
mod scheduler;

pub use registry::{EntityRegistry, LodEntity, LodStats};
pub use scheduler::{classify, LodPass, LodScheduler, TierChanged};
pub use tilesync_shared::render::LodTier;

use tilesync_shared::math::{Rect, Vec2};

/// Camera rectangle in world space, as exposed by the host renderer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Camera {
    pub scroll_x: f32,
    pub scroll_y: f32,
    pub width: f32,
    pub height: f32,
}

impl Camera {
    pub fn new(scroll_x: f32, scroll_y: f32, width: f32, height: f32) -> Self {
        Self {
            scroll_x,
            scroll_y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.scroll_x, self.scroll_y, self.width, self.height)
    }

    pub fn center(&self) -> Vec2 {
        self.rect().center()
    }

    /// Camera whose rectangle is centered on `center`.
    pub fn centered_on(center: Vec2, width: f32, height: f32) -> Self {
        Self::new(center.x - width * 0.5, center.y - height * 0.5, width, height)
    }
}
