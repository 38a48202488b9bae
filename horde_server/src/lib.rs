//! `horde_server`
//!
//! Authoritative simulation for the survival arena:
//! - Fixed-timestep tick loop (20 Hz by default) with bounded catch-up
//! - Entity store driven by an ordered list of stages
//! - Command/RPC channel with per-connection routing
//! - Session lifecycle and buff progression
//! - Importance-filtered snapshots
//!
//! Networking model:
//! - TCP, length-prefixed JSON frames, versioned handshake
//! - Network tasks feed a bounded queue drained at each tick start

pub mod channel;
pub mod connections;
pub mod importance;
pub mod report;
pub mod rpc;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod sim;
pub mod stages;

pub use report::TickReport;
pub use server::GameServer;
pub use session::SessionPhase;
pub use sim::Simulation;
