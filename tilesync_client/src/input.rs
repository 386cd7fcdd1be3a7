//! Input handling.
//!
//! In a real host this would integrate with windowing and key bindings.
//! This module turns raw directional state into a normalized
//! [`MovementInput`], detects the changed-input edges that are worth
//! sending, and resolves the facing direction used for animation.

use tilesync_shared::{
    movement::MovementInput,
    net::{ClientId, InputCommand},
};

/// Facing direction. Discriminants are the wire/animation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up = 0,
    Right = 1,
    Down = 2,
    Left = 3,
}

impl Direction {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Raw key state at a moment in time, before any cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl From<RawInput> for MovementInput {
    fn from(raw: RawInput) -> Self {
        MovementInput {
            up: raw.up,
            down: raw.down,
            left: raw.left,
            right: raw.right,
        }
    }
}

/// Resolves the facing direction for `current`.
///
/// Cardinal input maps directly. For a diagonal, the axis that was pressed
/// this frame wins; when both or neither are new, the previous direction is
/// kept if it is one of the two axes, otherwise the vertical axis is used.
/// Returns `None` when there is no movement.
pub fn resolve_direction(
    current: MovementInput,
    previous_input: MovementInput,
    previous_direction: Option<Direction>,
) -> Option<Direction> {
    let current = current.normalized();
    let previous_input = previous_input.normalized();

    let vertical = if current.up {
        Some(Direction::Up)
    } else if current.down {
        Some(Direction::Down)
    } else {
        None
    };
    let horizontal = if current.right {
        Some(Direction::Right)
    } else if current.left {
        Some(Direction::Left)
    } else {
        None
    };

    match (vertical, horizontal) {
        (None, None) => None,
        (Some(v), None) => Some(v),
        (None, Some(h)) => Some(h),
        (Some(v), Some(h)) => {
            let vertical_new = !held(previous_input, v);
            let horizontal_new = !held(previous_input, h);
            match (vertical_new, horizontal_new) {
                (true, false) => Some(v),
                (false, true) => Some(h),
                _ => match previous_direction {
                    Some(prev) if prev == v || prev == h => Some(prev),
                    _ => Some(v),
                },
            }
        }
    }
}

fn held(input: MovementInput, direction: Direction) -> bool {
    match direction {
        Direction::Up => input.up,
        Direction::Right => input.right,
        Direction::Down => input.down,
        Direction::Left => input.left,
    }
}

/// Result of sampling input for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSample {
    /// Normalized input.
    pub input: MovementInput,
    /// True when `input` differs from the previous sample.
    pub changed: bool,
    /// Current facing, kept from the last movement while idle.
    pub facing: Option<Direction>,
}

/// Per-frame input sampler.
#[derive(Debug, Default)]
pub struct InputSampler {
    last: MovementInput,
    facing: Option<Direction>,
}

impl InputSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, raw: RawInput) -> InputSample {
        let input = MovementInput::from(raw).normalized();
        let changed = input != self.last;
        if let Some(dir) = resolve_direction(input, self.last, self.facing) {
            self.facing = Some(dir);
        }
        self.last = input;
        InputSample {
            input,
            changed,
            facing: self.facing,
        }
    }

    pub fn last(&self) -> MovementInput {
        self.last
    }

    pub fn facing(&self) -> Option<Direction> {
        self.facing
    }
}

/// Builds the outbound command for a sampled input.
pub fn build_command(
    client_id: ClientId,
    seq: u64,
    timestamp_ms: u64,
    input: MovementInput,
) -> InputCommand {
    InputCommand {
        client_id,
        seq,
        timestamp_ms,
        input,
    }
}
