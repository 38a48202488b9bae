//! Enemy spawning: the interval spawner and the mass-spawn debug request.
//!
//! Enemies appear on a ring of `spawn_radius` around a random alive player.
//! The population cap counts enemies already in the world plus those queued
//! this stage; requests beyond it are silently trimmed.

use std::f32::consts::TAU;

use horde_shared::{
    components::{EntityKind, Enemy, Health, Position, Replicated},
    ecs::{EntityId, World},
    math::Vec2,
};
use rand::Rng;
use tracing::debug;

use crate::{report::EnemySpawned, session::SessionPhase, sim::SimContext};

use super::alive_players;

/// Interval spawner state.
#[derive(Debug, Clone, Default)]
pub struct Spawner {
    /// Seconds accumulated toward the next interval spawn.
    pub timer: f32,
    /// Enemies queued but not yet applied; cleared after every sync point.
    pub queued: u32,
}

impl Spawner {
    pub fn reset(&mut self) {
        self.timer = 0.0;
        self.queued = 0;
    }
}

/// Room left under the enemy cap.
pub fn headroom(world: &World, ctx: &SimContext) -> u32 {
    let population = world.count::<Enemy>() as u32 + ctx.spawner.queued;
    ctx.config.gameplay.max_enemies.saturating_sub(population)
}

/// Queues one enemy at `position`.
pub fn spawn_enemy(world: &World, ctx: &mut SimContext, position: Vec2) -> EntityId {
    let tuning = &ctx.config.gameplay.enemy;
    let enemy = Enemy {
        speed: tuning.speed,
        contact_damage: tuning.contact_damage,
        contact_cooldown: 0.0,
        target: None,
    };
    let health = Health::full(tuning.max_health);
    let position = position.clamp_abs(ctx.config.gameplay.arena_half_extent);

    let id = world.reserve_entity();
    ctx.commands
        .spawn(id)
        .insert(Position(position))
        .insert(health)
        .insert(enemy)
        .insert(Replicated {
            kind: EntityKind::Enemy,
        });
    ctx.spawner.queued += 1;
    ctx.events.push(EnemySpawned { enemy: id });
    id
}

/// Queues up to `count` enemies around `anchor`. Returns how many were
/// queued after the cap.
pub fn spawn_ring(world: &World, ctx: &mut SimContext, anchor: Vec2, count: u32) -> u32 {
    let n = count.min(headroom(world, ctx));
    let radius = ctx.config.gameplay.spawn_radius;
    for _ in 0..n {
        let angle = ctx.rng.gen_range(0.0..TAU);
        spawn_enemy(world, ctx, anchor + Vec2::from_angle(angle) * radius);
    }
    n
}

/// Interval spawner; runs inside the movement stage while the session is
/// active.
pub fn run(world: &mut World, ctx: &mut SimContext) {
    if ctx.session.phase != SessionPhase::Active {
        return;
    }
    let interval = ctx.config.gameplay.spawn_interval_secs.max(f32::EPSILON);
    ctx.spawner.timer += ctx.dt;
    while ctx.spawner.timer >= interval {
        ctx.spawner.timer -= interval;
        let players = alive_players(world);
        if players.is_empty() {
            continue;
        }
        let (_, anchor) = players[ctx.rng.gen_range(0..players.len())];
        if spawn_ring(world, ctx, anchor, 1) == 0 {
            debug!(tick = ctx.tick, "enemy cap reached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_shared::config::EngineConfig;

    #[test]
    fn ring_spawns_respect_the_cap() {
        let mut cfg = EngineConfig::default();
        cfg.gameplay.max_enemies = 4;
        let mut ctx = SimContext::new(cfg);
        let mut world = World::new();

        assert_eq!(spawn_ring(&world, &mut ctx, Vec2::ZERO, 3), 3);
        assert_eq!(spawn_ring(&world, &mut ctx, Vec2::ZERO, 3), 1, "queued count toward cap");
        world.apply(&mut ctx.commands);
        ctx.spawner.queued = 0;
        assert_eq!(world.count::<Enemy>(), 4);
        assert_eq!(headroom(&world, &ctx), 0);

        for (id, _) in world.query::<Enemy>() {
            let d = world.get::<Position>(id).unwrap().0.len();
            assert!((d - ctx.config.gameplay.spawn_radius).abs() < 1e-3);
        }
    }
}
