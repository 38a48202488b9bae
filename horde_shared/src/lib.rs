//! `horde_shared`
//!
//! Shared libraries used by the server, the headless client, and tests.
//!
//! Design goals:
//! - Deterministic where it matters: stable iteration order, seeded RNG.
//! - Clear separation of concerns (ecs, gameplay data, protocol, config).
//! - No `unsafe`.

pub mod buffs;
pub mod components;
pub mod config;
pub mod console;
pub mod ecs;
pub mod event;
pub mod math;
pub mod net;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::buffs::*;
    pub use crate::components::*;
    pub use crate::config::*;
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
}
