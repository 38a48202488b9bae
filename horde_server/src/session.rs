//! Game session lifecycle.
//!
//! ```text
//! WaitingForPlayers --(alive player)--> Active
//! Active --(no connections, no alive players)--> Resetting
//! Resetting --(next lifecycle run)--> WaitingForPlayers
//! ```
//!
//! The Resetting run queues destruction of every enemy, projectile, pickup,
//! and dead player. The run after that restores the counters. While waiting,
//! dead players whose connection is gone are discarded. The check runs
//! every tick and is idempotent: a phase only changes when its condition
//! holds.

use std::fmt;

use horde_shared::{
    components::{Enemy, Pickup, PendingOffer, Player, Position, Projectile},
    ecs::{EntityId, QueryFilter, World},
    net::ServerRpc,
};
use tracing::{debug, info};

use crate::{report::SessionTransition, sim::SimContext, stages::combat::kill_player};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    WaitingForPlayers,
    Active,
    Resetting,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::WaitingForPlayers => "waiting_for_players",
            SessionPhase::Active => "active",
            SessionPhase::Resetting => "resetting",
        })
    }
}

/// Session-wide singleton state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameSessionState {
    pub phase: SessionPhase,
    pub has_had_players: bool,
    /// Players currently holding an open buff offer.
    pub selecting_count: u32,
    /// Completed resets since startup.
    pub resets: u32,
    /// Operator asked for a reset (console `reset`).
    pub reset_requested: bool,
}

/// Stage 8.
pub fn run(world: &mut World, ctx: &mut SimContext) {
    reclaim_orphans(world, ctx);

    let alive = alive_players(world);
    let connected = ctx.connections.len();
    let from = ctx.session.phase;

    match from {
        SessionPhase::WaitingForPlayers => {
            if ctx.session.reset_requested {
                begin_reset(world, ctx);
                return;
            }
            discard_orphans(world, ctx);
            if alive > 0 {
                ctx.session.has_had_players = true;
                transition(ctx, SessionPhase::Active);
            }
        }
        SessionPhase::Active => {
            let abandoned = connected == 0 && alive == 0 && ctx.session.has_had_players;
            if abandoned || ctx.session.reset_requested {
                begin_reset(world, ctx);
            }
        }
        SessionPhase::Resetting => {
            ctx.session.has_had_players = false;
            // Offers opened during the Resetting tick stay open.
            ctx.session.selecting_count = open_offers(world);
            ctx.session.reset_requested = false;
            ctx.session.resets += 1;
            ctx.spawner.reset();
            ctx.pending_selections.clear();
            ctx.importance.clear();
            transition(ctx, SessionPhase::WaitingForPlayers);
        }
    }
}

fn transition(ctx: &mut SimContext, to: SessionPhase) {
    let from = ctx.session.phase;
    ctx.session.phase = to;
    info!(tick = ctx.tick, %from, %to, "session phase changed");
    ctx.events.push(SessionTransition { from, to });
}

fn begin_reset(world: &mut World, ctx: &mut SimContext) {
    transition(ctx, SessionPhase::Resetting);

    let all = QueryFilter::new().include_disabled();
    let mut doomed: Vec<EntityId> = Vec::new();
    doomed.extend(world.query_filtered::<Enemy>(&all).map(|(id, _)| id));
    doomed.extend(world.query_filtered::<Projectile>(&all).map(|(id, _)| id));
    for (id, pickup) in world.query_filtered::<Pickup>(&all) {
        let position = world.get::<Position>(id).map(|p| p.0).unwrap_or_default();
        ctx.channel.broadcast(ServerRpc::PickupDestroyed {
            pickup_id: pickup.id,
            position,
            value: pickup.value,
        });
        doomed.push(id);
    }
    doomed.extend(
        world
            .query_filtered::<Player>(&all)
            .filter(|(_, p)| !p.is_alive())
            .map(|(id, _)| id),
    );

    // Surviving players lose any open offer along with the counter.
    let holders: Vec<EntityId> = world
        .query_filtered::<PendingOffer>(&all)
        .map(|(id, _)| id)
        .collect();
    for id in holders {
        ctx.commands.remove::<PendingOffer>(id);
        release_selection(ctx, id);
    }

    info!(tick = ctx.tick, destroyed = doomed.len(), "session reset");
    for id in doomed {
        if let Some(conn) = ctx.connections.unlink(id) {
            debug!(tick = ctx.tick, connection = %conn, player = %id, "dead player detached");
        }
        ctx.commands.despawn(id);
    }
}

/// Flags players whose connection is gone as dead and takes back their
/// open offer.
fn reclaim_orphans(world: &mut World, ctx: &mut SimContext) {
    let all = QueryFilter::new().include_disabled();
    let orphans: Vec<EntityId> = world
        .query_filtered::<Player>(&all)
        .filter(|(_, p)| !ctx.connections.contains(p.connection))
        .map(|(id, _)| id)
        .collect();

    for player in orphans {
        if world.get::<Player>(player).is_some_and(Player::is_alive) {
            debug!(tick = ctx.tick, %player, "player lost its connection");
            kill_player(world, ctx, player);
        }
        if world.has::<PendingOffer>(player) {
            ctx.commands.remove::<PendingOffer>(player);
            release_selection(ctx, player);
            info!(tick = ctx.tick, %player, "reclaimed abandoned buff offer");
        }
    }
}

/// Dead players whose connection is gone. Before the session starts there is
/// nothing to keep them for.
fn discard_orphans(world: &World, ctx: &mut SimContext) {
    let all = QueryFilter::new().include_disabled();
    let orphans: Vec<EntityId> = world
        .query_filtered::<Player>(&all)
        .filter(|(_, p)| !p.is_alive() && !ctx.connections.contains(p.connection))
        .map(|(id, _)| id)
        .collect();
    for player in orphans {
        debug!(tick = ctx.tick, %player, "discarding orphaned player");
        ctx.commands.despawn(player);
    }
}

fn open_offers(world: &World) -> u32 {
    let all = QueryFilter::new().include_disabled();
    let open = world.query_filtered::<PendingOffer>(&all).count();
    u32::try_from(open).unwrap_or(u32::MAX)
}

/// Drops one player from the selecting counter, resuming play at zero.
pub(crate) fn release_selection(ctx: &mut SimContext, player: EntityId) {
    ctx.session.selecting_count = ctx.session.selecting_count.saturating_sub(1);
    if ctx.session.selecting_count == 0 {
        ctx.channel.broadcast(ServerRpc::GameResume {
            selecting_player: player,
        });
    }
}

fn alive_players(world: &World) -> usize {
    world
        .query::<Player>()
        .filter(|(_, p)| p.is_alive())
        .count()
}
