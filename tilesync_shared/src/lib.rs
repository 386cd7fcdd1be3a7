//! `tilesync_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic movement rules so prediction and the server agree.
//! - Clear separation of concerns (net, movement, math, events, render).
//! - Traits for abstraction and dependency injection.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod event;
pub mod math;
pub mod movement;
pub mod net;
pub mod render;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::movement::*;
    pub use crate::net::*;
    pub use crate::render::*;
}
