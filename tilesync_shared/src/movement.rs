//! Movement rules shared by client prediction and the authoritative server.
//!
//! Both sides must produce bit-identical displacements for the same input
//! and frame delta, otherwise reconciliation would never converge.

use std::f32::consts::FRAC_1_SQRT_2;

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Scale applied to both axes of a diagonal move so its length matches a
/// single-axis move.
pub const DIAGONAL_FACTOR: f32 = FRAC_1_SQRT_2;

/// Directional input for one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MovementInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl MovementInput {
    pub const IDLE: Self = Self {
        up: false,
        down: false,
        left: false,
        right: false,
    };

    /// Cancels opposing directions: up+down and left+right become neither.
    pub fn normalized(self) -> Self {
        let vertical = self.up != self.down;
        let horizontal = self.left != self.right;
        Self {
            up: vertical && self.up,
            down: vertical && self.down,
            left: horizontal && self.left,
            right: horizontal && self.right,
        }
    }

    pub fn is_normalized(&self) -> bool {
        !(self.up && self.down) && !(self.left && self.right)
    }

    pub fn is_idle(&self) -> bool {
        let n = self.normalized();
        !(n.up || n.down || n.left || n.right)
    }

    /// Unit-less axis vector with components in {-1, 0, 1}.
    pub fn axis(self) -> Vec2 {
        let n = self.normalized();
        let x = match (n.left, n.right) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };
        let y = match (n.up, n.down) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        };
        Vec2::new(x, y)
    }
}

/// Displacement produced by holding `input` for `dt_sec` at `speed` px/s.
pub fn displacement(input: MovementInput, speed: f32, dt_sec: f32) -> Vec2 {
    let mut v = input.axis();
    if v.x != 0.0 && v.y != 0.0 {
        v = v * DIAGONAL_FACTOR;
    }
    v * (speed * dt_sec)
}

/// Position after holding `input` for `dt_sec`.
pub fn step(position: Vec2, input: MovementInput, speed: f32, dt_sec: f32) -> Vec2 {
    position + displacement(input, speed, dt_sec)
}
