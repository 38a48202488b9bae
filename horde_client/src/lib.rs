//! `horde_client`
//!
//! Headless client for the survival arena:
//! - Versioned handshake and framed TCP messaging
//! - Input and RPC sending
//! - Merged view of importance-filtered snapshots
//! - Pickup mirror driven by server notifications
//! - A scripted wander-and-shoot brain for bots and tests

pub mod client;
pub mod input;
pub mod mirror;

pub use client::{ClientState, GameClient};
