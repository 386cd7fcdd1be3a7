//! `tilesync_server`
//!
//! Reference authoritative server:
//! - Fixed timestep kinematic simulation
//! - Receives sequenced `InputCommand`s
//! - Sends `PositionSnapshot`s to owners and `EntityPositionUpdate`s to everyone else
//!
//! Networking model:
//! - TCP: handshake/control plane
//! - UDP: gameplay plane (inputs/positions)

pub mod server;

pub use server::GameServer;
