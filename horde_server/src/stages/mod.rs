//! Per-tick simulation stages.
//!
//! Each stage is a plain function over `(&mut World, &mut SimContext)`.
//! Stages never block; structural changes go through `ctx.commands` and are
//! applied by the simulation after the stage returns.

pub mod combat;
pub mod intake;
pub mod movement;
pub mod pickups;
pub mod progression;
pub mod spawn;
pub mod stats;

use horde_shared::{
    components::{Player, Position},
    ecs::{EntityId, World},
    math::Vec2,
};

/// Alive, enabled players with their positions, ascending id.
pub(crate) fn alive_players(world: &World) -> Vec<(EntityId, Vec2)> {
    world
        .query::<Player>()
        .filter(|(_, p)| p.is_alive())
        .filter_map(|(id, _)| world.get::<Position>(id).map(|pos| (id, pos.0)))
        .collect()
}

/// Closest candidate to `from`. Ties go to the lower id.
pub(crate) fn nearest(from: Vec2, candidates: &[(EntityId, Vec2)]) -> Option<(EntityId, Vec2)> {
    candidates.iter().copied().fold(None, |best, (id, at)| {
        let d2 = from.distance_sq(at);
        match best {
            Some((_, _, best_d2)) if best_d2 <= d2 => best,
            _ => Some((id, at, d2)),
        }
    })
    .map(|(id, at, _)| (id, at))
}
