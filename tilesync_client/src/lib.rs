//! `tilesync_client`
//!
//! Client-side systems:
//! - Input sampling and changed-input edge detection
//! - Local prediction with a bounded, sequenced input buffer
//! - Reconciliation against authoritative snapshots with smoothed correction
//! - Interpolation for remote entity positions
//! - Distance/viewport LOD scheduling for networked entities

pub mod client;
pub mod input;
pub mod interp;
pub mod lod;
pub mod predict;
pub mod reconcile;
pub mod session;

pub use client::GameClient;
pub use session::ClientSession;
