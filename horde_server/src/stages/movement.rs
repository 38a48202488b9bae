//! Stage 3: movement and targeting.
//!
//! Order within the stage:
//! 1. players move along their latest intent
//! 2. the interval spawner runs
//! 3. enemies retarget the nearest alive player and walk toward it
//! 4. players fire
//! 5. projectiles steer (homing), advance, and expire
//!
//! Dead players are disabled or flagged, and are skipped everywhere here.

use horde_shared::{
    components::{
        Enemy, EntityKind, Homing, MoveIntent, Player, PlayerStats, Position, Projectile,
        Replicated, Shooter,
    },
    ecs::{EntityId, World},
    math::Vec2,
};

use crate::sim::SimContext;

use super::{alive_players, nearest, spawn};

pub fn run(world: &mut World, ctx: &mut SimContext) {
    move_players(world, ctx);
    spawn::run(world, ctx);
    move_enemies(world, ctx);
    fire(world, ctx);
    move_projectiles(world, ctx);
}

fn move_players(world: &mut World, ctx: &SimContext) {
    let half = ctx.config.gameplay.arena_half_extent;
    let ids: Vec<EntityId> = world
        .query::<Player>()
        .filter(|(_, p)| p.is_alive())
        .map(|(id, _)| id)
        .collect();
    for id in ids {
        let (Some(intent), Some(stats)) = (
            world.get::<MoveIntent>(id).copied(),
            world.get::<PlayerStats>(id).copied(),
        ) else {
            continue;
        };
        let step = intent.movement.clamp_len(1.0) * (stats.move_speed * ctx.dt);
        if let Some(pos) = world.get_mut::<Position>(id) {
            pos.0 = (pos.0 + step).clamp_abs(half);
        }
    }
}

fn move_enemies(world: &mut World, ctx: &SimContext) {
    let players = alive_players(world);
    let ids: Vec<EntityId> = world.query::<Enemy>().map(|(id, _)| id).collect();
    for id in ids {
        let Some(pos) = world.get::<Position>(id).map(|p| p.0) else {
            continue;
        };
        let target = nearest(pos, &players);
        let Some(enemy) = world.get_mut::<Enemy>(id) else {
            continue;
        };
        enemy.target = target.map(|(tid, _)| tid);
        let step = enemy.speed * ctx.dt;
        if let (Some((_, at)), Some(p)) = (target, world.get_mut::<Position>(id)) {
            p.0 = p.0.move_towards(at, step);
        }
    }
}

fn fire(world: &mut World, ctx: &mut SimContext) {
    let enemies: Vec<(EntityId, Vec2)> = world
        .query::<Enemy>()
        .filter_map(|(id, _)| world.get::<Position>(id).map(|p| (id, p.0)))
        .collect();
    let shooters: Vec<EntityId> = world
        .query::<Player>()
        .filter(|(_, p)| p.is_alive())
        .map(|(id, _)| id)
        .collect();

    for id in shooters {
        let (Some(intent), Some(stats), Some(origin)) = (
            world.get::<MoveIntent>(id).copied(),
            world.get::<PlayerStats>(id).copied(),
            world.get::<Position>(id).map(|p| p.0),
        ) else {
            continue;
        };
        let Some(shooter) = world.get_mut::<Shooter>(id) else {
            continue;
        };
        shooter.cooldown = (shooter.cooldown - ctx.dt).max(0.0);
        let direction = intent.aim.normalize_or_zero();
        if !intent.fire || shooter.cooldown > 0.0 || direction == Vec2::ZERO {
            continue;
        }
        shooter.cooldown = stats.fire_interval;

        let homing = (stats.homing_turn_rate > 0.0)
            .then(|| nearest(origin, &enemies))
            .flatten()
            .map(|(target, _)| Homing {
                target,
                turn_rate: stats.homing_turn_rate,
            });
        let projectile = Projectile {
            owner: id,
            direction,
            speed: stats.projectile_speed,
            lifetime: ctx.config.gameplay.projectile.lifetime_secs,
            damage: stats.damage,
            homing,
        };
        let pid = world.reserve_entity();
        ctx.commands
            .spawn(pid)
            .insert(Position(origin))
            .insert(projectile)
            .insert(Replicated {
                kind: EntityKind::Projectile,
            });
    }
}

fn move_projectiles(world: &mut World, ctx: &mut SimContext) {
    let ids: Vec<EntityId> = world.query::<Projectile>().map(|(id, _)| id).collect();
    for id in ids {
        let Some(mut projectile) = world.get::<Projectile>(id).copied() else {
            continue;
        };
        projectile.lifetime -= ctx.dt;
        if projectile.lifetime <= 0.0 {
            ctx.commands.despawn(id);
            continue;
        }
        let Some(pos) = world.get::<Position>(id).map(|p| p.0) else {
            continue;
        };
        if let Some(homing) = projectile.homing {
            let target_pos = world
                .is_enabled(homing.target)
                .then(|| world.get::<Position>(homing.target))
                .flatten()
                .filter(|_| world.has::<Enemy>(homing.target));
            match target_pos {
                Some(at) => {
                    projectile.direction = projectile
                        .direction
                        .rotate_towards(at.0 - pos, homing.turn_rate * ctx.dt);
                }
                // Target gone: keep flying straight.
                None => projectile.homing = None,
            }
        }
        let next = pos + projectile.direction * (projectile.speed * ctx.dt);
        if let Some(p) = world.get_mut::<Position>(id) {
            p.0 = next;
        }
        if let Some(slot) = world.get_mut::<Projectile>(id) {
            *slot = projectile;
        }
    }
}
