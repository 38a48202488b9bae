//! Stage 1: input intake.
//!
//! Drains the whole inbound queue in arrival order and matches each item to
//! the connection that sent it. Requests that cannot be matched are dropped
//! with a warning; nothing here is fatal.

use horde_shared::{
    buffs::BuffLevels,
    components::{EntityKind, Health, MoveIntent, Player, Position, Progression, Replicated, Shooter},
    ecs::{EntityId, World},
    net::{ConnectionId, ServerRpc},
};
use tracing::{debug, info, warn};

use crate::{
    channel::InboundKind,
    report::PlayerSpawned,
    rpc::{self, report_dropped, RpcError},
    sim::SimContext,
};

use super::stats::derive_stats;

pub fn run(world: &mut World, ctx: &mut SimContext) {
    for item in ctx.channel.drain_inbound() {
        let from = item.from;
        match item.kind {
            InboundKind::Connected => {
                if ctx.connections.connect(from, ctx.tick) {
                    info!(tick = ctx.tick, connection = %from, "connection registered");
                } else {
                    warn!(connection = %from, "duplicate connect ignored");
                }
            }
            InboundKind::Ready => {
                if let Err(err) = spawn_player(world, ctx, from) {
                    report_dropped(ctx, from, "client_ready", &err);
                }
            }
            InboundKind::Disconnected => {
                // The player keeps a stale back-reference; the lifecycle
                // stage flags it dead.
                match ctx.connections.disconnect(from) {
                    Some(conn) => info!(
                        tick = ctx.tick,
                        connection = %from,
                        player = ?conn.player,
                        "connection closed"
                    ),
                    None => debug!(connection = %from, "disconnect for unknown connection"),
                }
            }
            InboundKind::Input(input) => {
                let Some(player) = ctx.connections.player_of(from) else {
                    warn!(connection = %from, "input from connection without player dropped");
                    continue;
                };
                // Absent until the spawn is applied at the end of this stage.
                if let Some(intent) = world.get_mut::<MoveIntent>(player) {
                    *intent = MoveIntent {
                        movement: input.movement,
                        aim: input.aim,
                        fire: input.fire,
                    };
                }
            }
            InboundKind::Rpc(call) => {
                if let Err(err) = rpc::handle(world, ctx, from, &call) {
                    report_dropped(ctx, from, call.name(), &err);
                }
            }
        }
    }
}

/// Queues a fresh player for `connection` at a random spawn point and links
/// it in the connection index.
pub fn spawn_player(world: &World, ctx: &mut SimContext, connection: ConnectionId) -> Result<EntityId, RpcError> {
    if !ctx.connections.contains(connection) {
        return Err(RpcError::UnknownConnection(connection));
    }
    if ctx.connections.player_of(connection).is_some() {
        return Err(RpcError::AlreadySpawned(connection));
    }

    let levels = BuffLevels::default();
    let stats = derive_stats(&levels, &ctx.config.gameplay);
    let at = ctx.random_spawn_point();
    let id = world.reserve_entity();
    ctx.commands
        .spawn(id)
        .insert(Player::new(connection))
        .insert(Position(at))
        .insert(Health::full(stats.max_health))
        .insert(MoveIntent::default())
        .insert(Shooter::default())
        .insert(Progression::default())
        .insert(levels)
        .insert(stats)
        .insert(Replicated {
            kind: EntityKind::Player,
        });
    ctx.connections.link(connection, id);
    ctx.channel
        .send_to(connection, ServerRpc::PlayerAssigned { player: id });
    ctx.events.push(PlayerSpawned {
        player: id,
        connection,
    });
    info!(tick = ctx.tick, %connection, player = %id, x = at.x, y = at.y, "player spawned");
    Ok(id)
}
