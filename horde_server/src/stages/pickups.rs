//! Stage 5: pickup physics, magnet attraction, and collection.
//!
//! A fresh drop bursts out with a random offset and velocity and bounces a
//! few times before it settles. Only settled pickups (no [`PickupMotion`])
//! feel the magnet. Collection is independent of both: anything inside
//! `collect_radius` of an alive player is claimed.
//!
//! A pickup is claimed at most once. The claim is the queued despawn, so a
//! second evaluation in the same tick sees it and backs off.

use std::f32::consts::TAU;

use horde_shared::{
    components::{
        EntityKind, Pickup, PickupMotion, PlayerStats, Position, Progression, Replicated,
    },
    ecs::{EntityId, QueryFilter, World},
    math::{lerp, Vec2},
    net::ServerRpc,
};
use rand::Rng;
use tracing::debug;

use crate::{
    report::{PickupClaimed, PickupDropped},
    sim::SimContext,
};

use super::alive_players;

pub fn run(world: &mut World, ctx: &mut SimContext) {
    settle(world, ctx);
    attract(world, ctx);
    collect_in_range(world, ctx);
}

/// Queues a pickup near `at` and announces it.
pub(crate) fn drop_pickup(world: &World, ctx: &mut SimContext, at: Vec2, value: u32) -> EntityId {
    let tuning = ctx.config.gameplay.pickup.clone();
    let half = ctx.config.gameplay.arena_half_extent;

    let offset = Vec2::from_angle(ctx.rng.gen_range(0.0..TAU))
        * ctx.rng.gen_range(0.0..=tuning.spawn_offset.max(0.0));
    let velocity = Vec2::from_angle(ctx.rng.gen_range(0.0..TAU))
        * ctx.rng.gen_range(0.0..=tuning.spawn_speed.max(0.0));
    let position = (at + offset).clamp_abs(half);

    let pickup_id = ctx.next_pickup_id();
    let id = world.reserve_entity();
    ctx.commands
        .spawn(id)
        .insert(Position(position))
        .insert(Pickup {
            id: pickup_id,
            value,
        })
        .insert(PickupMotion {
            velocity,
            height: 0.0,
            vertical_speed: tuning.spawn_lift,
            bounces_left: tuning.max_bounces,
        })
        .insert(Replicated {
            kind: EntityKind::Pickup,
        });
    ctx.channel.broadcast(ServerRpc::PickupSpawned {
        pickup_id,
        position,
        value,
    });
    ctx.events.push(PickupDropped {
        pickup: pickup_id,
        value,
    });
    id
}

fn settle(world: &mut World, ctx: &mut SimContext) {
    let tuning = &ctx.config.gameplay.pickup;
    let half = ctx.config.gameplay.arena_half_extent;
    let dt = ctx.dt;

    let ids: Vec<EntityId> = world.query::<PickupMotion>().map(|(id, _)| id).collect();
    for id in ids {
        let Some(mut motion) = world.get::<PickupMotion>(id).copied() else {
            continue;
        };

        motion.vertical_speed -= tuning.gravity * dt;
        motion.height += motion.vertical_speed * dt;
        if motion.height <= 0.0 {
            motion.height = 0.0;
            if motion.vertical_speed < 0.0 {
                if motion.bounces_left > 0 {
                    motion.bounces_left -= 1;
                    motion.vertical_speed = -motion.vertical_speed * tuning.bounce_restitution;
                } else {
                    motion.vertical_speed = 0.0;
                }
            }
        }

        let grounded = motion.height <= 0.0 && motion.vertical_speed == 0.0;
        if grounded {
            let speed = motion.velocity.len();
            let slowed = (speed - tuning.friction * dt).max(0.0);
            motion.velocity = motion.velocity.normalize_or_zero() * slowed;
        }
        if let Some(pos) = world.get_mut::<Position>(id) {
            pos.0 = (pos.0 + motion.velocity * dt).clamp_abs(half);
        }

        if grounded && motion.velocity.len() <= tuning.settle_speed {
            ctx.commands.remove::<PickupMotion>(id);
        } else if let Some(slot) = world.get_mut::<PickupMotion>(id) {
            *slot = motion;
        }
    }
}

/// Pull speed for a pickup `distance` away from a magnet of `radius`:
/// `min` right next to the player, `max` at the edge.
pub fn magnet_speed(distance: f32, radius: f32, min: f32, max: f32) -> f32 {
    let t = if radius > 0.0 {
        (distance / radius).clamp(0.0, 1.0)
    } else {
        0.0
    };
    lerp(min, max, t)
}

fn attract(world: &mut World, ctx: &SimContext) {
    let tuning = &ctx.config.gameplay.pickup;
    let magnets: Vec<(Vec2, f32)> = alive_players(world)
        .into_iter()
        .filter_map(|(id, at)| world.get::<PlayerStats>(id).map(|s| (at, s.magnet_radius)))
        .collect();
    let settled = QueryFilter::new().without::<PickupMotion>();
    let ids: Vec<EntityId> = world
        .query_filtered::<Pickup>(&settled)
        .map(|(id, _)| id)
        .collect();

    for id in ids {
        let Some(pos) = world.get_mut::<Position>(id) else {
            continue;
        };
        // Strongest pull wins: the nearest magnet that has it in range.
        let target = magnets
            .iter()
            .map(|(at, radius)| (*at, *radius, pos.0.distance(*at)))
            .filter(|(_, radius, d)| d <= radius)
            .min_by(|a, b| a.2.total_cmp(&b.2));
        if let Some((at, radius, d)) = target {
            let speed = magnet_speed(d, radius, tuning.magnet_min_speed, tuning.magnet_max_speed);
            pos.0 = pos.0.move_towards(at, speed * ctx.dt);
        }
    }
}

fn collect_in_range(world: &mut World, ctx: &mut SimContext) {
    let radius = ctx.config.gameplay.pickup.collect_radius;
    let players = alive_players(world);
    let pickups: Vec<(EntityId, Vec2)> = world
        .query::<Pickup>()
        .filter_map(|(id, _)| world.get::<Position>(id).map(|p| (id, p.0)))
        .collect();

    for (pickup, at) in pickups {
        for (player, player_at) in &players {
            if at.distance_sq(*player_at) <= radius * radius && try_collect(world, ctx, pickup, *player) {
                break;
            }
        }
    }
}

/// Awards `pickup` to `collector` unless it has already been claimed this
/// tick. Returns true if this call made the award.
pub fn try_collect(world: &mut World, ctx: &mut SimContext, pickup: EntityId, collector: EntityId) -> bool {
    if ctx.commands.despawn_queued(pickup) {
        debug!(%pickup, %collector, "pickup already claimed");
        return false;
    }
    let Some(item) = world.get::<Pickup>(pickup).copied() else {
        return false;
    };
    let position = world.get::<Position>(pickup).map(|p| p.0).unwrap_or_default();
    let Some(progress) = world.get_mut::<Progression>(collector) else {
        return false;
    };
    progress.points = progress.points.saturating_add(item.value);

    ctx.commands.despawn(pickup);
    ctx.channel.broadcast(ServerRpc::PickupCollected {
        pickup_id: item.id,
        position,
        value: item.value,
        collector,
    });
    ctx.events.push(PickupClaimed {
        pickup: item.id,
        collector,
        value: item.value,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::stats::derive_stats;
    use horde_shared::{
        buffs::BuffLevels,
        components::{Health, Player},
        config::EngineConfig,
        net::ConnectionId,
    };

    fn player(world: &mut World, ctx: &SimContext, at: Vec2) -> EntityId {
        let id = world.spawn();
        world.insert(id, Player::new(ConnectionId(id.0 as u32))).unwrap();
        world.insert(id, Position(at)).unwrap();
        world.insert(id, Health::full(100.0)).unwrap();
        world.insert(id, Progression::default()).unwrap();
        world
            .insert(id, derive_stats(&BuffLevels::default(), &ctx.config.gameplay))
            .unwrap();
        id
    }

    fn settled_pickup(world: &mut World, at: Vec2, value: u32) -> EntityId {
        let id = world.spawn();
        world.insert(id, Position(at)).unwrap();
        world.insert(id, Pickup { id: horde_shared::components::PickupId(id.0 as u32), value }).unwrap();
        id
    }

    #[test]
    fn magnet_speed_scales_with_distance() {
        assert_eq!(magnet_speed(0.0, 5.0, 2.0, 12.0), 2.0);
        assert_eq!(magnet_speed(5.0, 5.0, 2.0, 12.0), 12.0);
        assert_eq!(magnet_speed(2.5, 5.0, 2.0, 12.0), 7.0);
        assert_eq!(magnet_speed(9.0, 5.0, 2.0, 12.0), 12.0);
    }

    #[test]
    fn concurrent_collects_award_once() {
        let mut ctx = SimContext::new(EngineConfig::default());
        let mut world = World::new();
        let a = player(&mut world, &ctx, Vec2::ZERO);
        let b = player(&mut world, &ctx, Vec2::new(0.1, 0.0));
        let item = settled_pickup(&mut world, Vec2::ZERO, 5);

        assert!(try_collect(&mut world, &mut ctx, item, a));
        assert!(!try_collect(&mut world, &mut ctx, item, b));
        world.apply(&mut ctx.commands);

        let total: u32 = [a, b]
            .iter()
            .map(|p| world.get::<Progression>(*p).unwrap().points)
            .sum();
        assert_eq!(total, 5);
        assert!(!world.contains(item));
        assert_eq!(ctx.events.drain::<PickupClaimed>().len(), 1);
    }

    #[test]
    fn two_players_in_range_share_one_pickup() {
        let mut ctx = SimContext::new(EngineConfig::default());
        let mut world = World::new();
        let a = player(&mut world, &ctx, Vec2::new(-0.2, 0.0));
        let b = player(&mut world, &ctx, Vec2::new(0.2, 0.0));
        settled_pickup(&mut world, Vec2::ZERO, 5);

        collect_in_range(&mut world, &mut ctx);
        collect_in_range(&mut world, &mut ctx);
        world.apply(&mut ctx.commands);

        let pa = world.get::<Progression>(a).unwrap().points;
        let pb = world.get::<Progression>(b).unwrap().points;
        assert_eq!((pa, pb), (5, 0));
    }

    #[test]
    fn magnet_pulls_settled_pickups_without_overshoot() {
        let mut ctx = SimContext::new(EngineConfig::default());
        let mut world = World::new();
        player(&mut world, &ctx, Vec2::ZERO);
        let near = settled_pickup(&mut world, Vec2::new(0.05, 0.0), 1);
        let mid = settled_pickup(&mut world, Vec2::new(4.0, 0.0), 1);
        let far = settled_pickup(&mut world, Vec2::new(20.0, 0.0), 1);

        attract(&mut world, &ctx);

        assert_eq!(world.get::<Position>(near).unwrap().0, Vec2::ZERO, "clamped at player");
        let moved = 4.0 - world.get::<Position>(mid).unwrap().0.x;
        let expected = magnet_speed(4.0, 5.0, 2.0, 12.0) * ctx.dt;
        assert!((moved - expected).abs() < 1e-4);
        assert_eq!(world.get::<Position>(far).unwrap().0.x, 20.0, "out of range");
    }

    #[test]
    fn fresh_drops_bounce_then_settle() {
        let mut ctx = SimContext::new(EngineConfig::default());
        let mut world = World::new();
        player(&mut world, &ctx, Vec2::new(3.0, 0.0));
        let id = drop_pickup(&world, &mut ctx, Vec2::ZERO, 5);
        world.apply(&mut ctx.commands);
        assert!(world.has::<PickupMotion>(id));

        // Unsettled pickups ignore the magnet.
        let before = world.get::<Position>(id).unwrap().0;
        attract(&mut world, &ctx);
        assert_eq!(world.get::<Position>(id).unwrap().0, before);

        let mut ticks = 0;
        while world.has::<PickupMotion>(id) && ticks < 200 {
            settle(&mut world, &mut ctx);
            world.apply(&mut ctx.commands);
            ticks += 1;
        }
        assert!(!world.has::<PickupMotion>(id), "settled within {ticks} ticks");
        assert!(ticks > 1);
    }
}
