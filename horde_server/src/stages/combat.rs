//! Stage 4: combat resolution.
//!
//! Contact damage: every enemy whose contact cooldown has elapsed hurts each
//! alive player it overlaps, then waits `contact_interval_secs`.
//!
//! Projectile hits: projectiles are checked against enemies in id order and
//! are consumed by their first hit. An enemy killed earlier in the tick is
//! already gone: later hits on it are no-ops and leave the projectile
//! flying. Each kill queues the enemy's destruction and drops a pickup.
//! All kills of the tick go out as one `KillCountDelta`.

use std::collections::BTreeSet;

use horde_shared::{
    components::{Enemy, Health, Player, PlayerStatus, Position, Projectile},
    ecs::{EntityId, World},
    math::Vec2,
    net::ServerRpc,
};
use tracing::info;

use crate::{
    report::{EnemyKilled, PlayerDied},
    sim::SimContext,
};

use super::pickups::drop_pickup;

pub fn run(world: &mut World, ctx: &mut SimContext) {
    resolve_contacts(world, ctx);
    let kills = resolve_projectiles(world, ctx);
    if kills > 0 {
        ctx.channel
            .broadcast(ServerRpc::KillCountDelta { amount: kills });
    }
}

/// Flags a player dead and queues its disable. No-op for a dead player.
pub(crate) fn kill_player(world: &mut World, ctx: &mut SimContext, player: EntityId) {
    let Some(record) = world.get_mut::<Player>(player) else {
        return;
    };
    if !record.is_alive() {
        return;
    }
    record.status = PlayerStatus::Dead {
        since_tick: ctx.tick,
    };
    let connection = record.connection;
    if let Some(health) = world.get_mut::<Health>(player) {
        health.current = health.current.min(0.0);
    }
    ctx.commands.disable(player);
    ctx.events.push(PlayerDied { player });
    info!(tick = ctx.tick, %player, %connection, "player died");
}

fn resolve_contacts(world: &mut World, ctx: &mut SimContext) {
    let tuning = &ctx.config.gameplay;
    let reach = tuning.enemy.radius + tuning.player.radius;
    let interval = tuning.enemy.contact_interval_secs;
    let dt = ctx.dt;

    let enemies: Vec<EntityId> = world.query::<Enemy>().map(|(id, _)| id).collect();
    for enemy_id in enemies {
        let Some(at) = world.get::<Position>(enemy_id).map(|p| p.0) else {
            continue;
        };
        let Some(enemy) = world.get_mut::<Enemy>(enemy_id) else {
            continue;
        };
        enemy.contact_cooldown = (enemy.contact_cooldown - dt).max(0.0);
        if enemy.contact_cooldown > 0.0 {
            continue;
        }
        let damage = enemy.contact_damage;

        let touching: Vec<(EntityId, Vec2)> = super::alive_players(world)
            .into_iter()
            .filter(|(_, p)| p.distance_sq(at) <= reach * reach)
            .collect();
        if touching.is_empty() {
            continue;
        }
        if let Some(enemy) = world.get_mut::<Enemy>(enemy_id) {
            enemy.contact_cooldown = interval;
        }
        for (player, position) in touching {
            let lethal = world
                .get_mut::<Health>(player)
                .is_some_and(|h| h.apply_damage(damage));
            ctx.channel
                .broadcast(ServerRpc::HitEffect { position, damage });
            if lethal {
                kill_player(world, ctx, player);
            }
        }
    }
}

fn resolve_projectiles(world: &mut World, ctx: &mut SimContext) -> u32 {
    let tuning = &ctx.config.gameplay;
    let reach = tuning.projectile.radius + tuning.enemy.radius;
    let pickup_value = tuning.enemy.pickup_value;

    let enemies: Vec<(EntityId, Vec2)> = world
        .query::<Enemy>()
        .filter_map(|(id, _)| world.get::<Position>(id).map(|p| (id, p.0)))
        .collect();
    let projectiles: Vec<(EntityId, Vec2, Projectile)> = world
        .query::<Projectile>()
        .filter_map(|(id, proj)| world.get::<Position>(id).map(|p| (id, p.0, *proj)))
        .collect();

    let mut killed: BTreeSet<EntityId> = BTreeSet::new();
    for (projectile_id, at, projectile) in projectiles {
        for (enemy_id, enemy_at) in &enemies {
            if killed.contains(enemy_id) || at.distance_sq(*enemy_at) > reach * reach {
                continue;
            }
            let Some(health) = world.get_mut::<Health>(*enemy_id) else {
                continue;
            };
            let lethal = health.apply_damage(projectile.damage);
            ctx.commands.despawn(projectile_id);
            ctx.channel.broadcast(ServerRpc::HitEffect {
                position: *enemy_at,
                damage: projectile.damage,
            });
            if lethal {
                killed.insert(*enemy_id);
                ctx.commands.despawn(*enemy_id);
                drop_pickup(world, ctx, *enemy_at, pickup_value);
                ctx.events.push(EnemyKilled {
                    enemy: *enemy_id,
                    by: projectile.owner,
                    position: *enemy_at,
                });
            }
            break;
        }
    }
    killed.len() as u32
}
