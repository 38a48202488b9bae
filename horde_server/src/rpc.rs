//! Client request handling.
//!
//! Every failure is an [`RpcError`], and every error maps onto one class of
//! the server's error taxonomy through [`RpcError::class`]. None of them are
//! fatal: the intake stage logs the error, counts it in the tick report, and
//! moves on.

use std::fmt;

use horde_shared::{
    buffs::BuffType,
    components::{Health, MoveIntent, Player, PlayerStats, PlayerStatus, Position, Progression, Shooter},
    ecs::{EntityId, World},
    net::{ClientRpc, ConnectionId},
};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    report::{PlayerRespawned, RpcDropped},
    sim::{SelectionRequest, SimContext},
    stages::{alive_players, combat::kill_player, spawn::spawn_ring},
};

/// Error taxonomy classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed or disallowed request; logged and dropped.
    Protocol,
    /// Request would break a state invariant; rejected at the mutation site.
    InvariantViolation,
    /// A cap was hit; the request is trimmed or ignored.
    ResourceCap,
    /// The request raced a lifecycle change; treated as not found.
    LifecycleRace,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Protocol => "protocol",
            ErrorClass::InvariantViolation => "invariant_violation",
            ErrorClass::ResourceCap => "resource_cap",
            ErrorClass::LifecycleRace => "lifecycle_race",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("connection {0} has no player")]
    NoPlayer(ConnectionId),
    #[error("connection {0} already has a player")]
    AlreadySpawned(ConnectionId),
    #[error("player {0} no longer exists")]
    PlayerGone(EntityId),
    #[error("debug commands are disabled")]
    DebugDisabled,
    #[error("unknown buff type id {0}")]
    UnknownBuff(u8),
    #[error("mass spawn count must be positive")]
    EmptySpawnRequest,
    #[error("player {0} has no open buff offer")]
    NoOpenOffer(EntityId),
    #[error("buff {buff} was not offered to player {player}")]
    NotOffered { player: EntityId, buff: BuffType },
    #[error("buff {0} is already at max level")]
    BuffMaxed(BuffType),
    #[error("player {0} is not dead")]
    NotDead(EntityId),
    #[error("player {0} is dead")]
    PlayerDead(EntityId),
    #[error("no alive player to spawn enemies near")]
    NoSpawnAnchor,
    #[error("enemy cap reached")]
    EnemyCapReached,
}

impl RpcError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::NoPlayer(_)
            | RpcError::AlreadySpawned(_)
            | RpcError::DebugDisabled
            | RpcError::UnknownBuff(_)
            | RpcError::EmptySpawnRequest => ErrorClass::Protocol,
            RpcError::NoOpenOffer(_)
            | RpcError::NotOffered { .. }
            | RpcError::BuffMaxed(_)
            | RpcError::NotDead(_)
            | RpcError::PlayerDead(_) => ErrorClass::InvariantViolation,
            RpcError::EnemyCapReached => ErrorClass::ResourceCap,
            RpcError::UnknownConnection(_) | RpcError::PlayerGone(_) | RpcError::NoSpawnAnchor => {
                ErrorClass::LifecycleRace
            }
        }
    }
}

/// Logs a rejected request and records it for the tick report.
pub(crate) fn report_dropped(
    ctx: &mut SimContext,
    connection: ConnectionId,
    rpc: &'static str,
    err: &RpcError,
) {
    let class = err.class();
    if class == ErrorClass::ResourceCap {
        debug!(tick = ctx.tick, %connection, rpc, %class, error = %err, "request capped");
    } else {
        warn!(tick = ctx.tick, %connection, rpc, %class, error = %err, "dropped request");
    }
    ctx.events.push(RpcDropped {
        connection,
        rpc,
        class,
        reason: err.to_string(),
    });
}

/// Handles one request from `from`. `SelectBuff` is only queued here and
/// resolved by the selection stage.
pub fn handle(world: &mut World, ctx: &mut SimContext, from: ConnectionId, rpc: &ClientRpc) -> Result<(), RpcError> {
    if !ctx.connections.contains(from) {
        return Err(RpcError::UnknownConnection(from));
    }
    let is_debug = matches!(
        rpc,
        ClientRpc::RequestMassSpawn { .. } | ClientRpc::DebugAddPoints { .. } | ClientRpc::DebugKillSelf
    );
    if is_debug && !ctx.config.debug_commands {
        return Err(RpcError::DebugDisabled);
    }
    let player = ctx.connections.player_of(from).ok_or(RpcError::NoPlayer(from))?;
    if !world.contains(player) {
        return Err(RpcError::PlayerGone(player));
    }

    match *rpc {
        ClientRpc::SelectBuff { buff_type_id } => {
            ctx.pending_selections.push_back(SelectionRequest {
                connection: from,
                buff_type_id,
            });
            Ok(())
        }
        ClientRpc::RequestRespawn => respawn(world, ctx, player),
        ClientRpc::RequestMassSpawn { count } => mass_spawn(world, ctx, count),
        ClientRpc::DebugAddPoints { amount } => {
            let progress = world
                .get_mut::<Progression>(player)
                .ok_or(RpcError::PlayerGone(player))?;
            progress.points = progress.points.saturating_add(amount);
            debug!(tick = ctx.tick, %player, amount, total = progress.points, "debug points added");
            Ok(())
        }
        ClientRpc::DebugKillSelf => {
            if !world.get::<Player>(player).is_some_and(Player::is_alive) {
                return Err(RpcError::PlayerDead(player));
            }
            if let Some(health) = world.get_mut::<Health>(player) {
                health.current = 0.0;
            }
            kill_player(world, ctx, player);
            Ok(())
        }
    }
}

/// Revives a dead player at a random spawn point with full health.
fn respawn(world: &mut World, ctx: &mut SimContext, player: EntityId) -> Result<(), RpcError> {
    let record = world
        .get_mut::<Player>(player)
        .ok_or(RpcError::PlayerGone(player))?;
    if record.is_alive() {
        return Err(RpcError::NotDead(player));
    }
    record.status = PlayerStatus::Alive;

    let at = ctx.random_spawn_point();
    let max_health = world
        .get::<PlayerStats>(player)
        .map_or(ctx.config.gameplay.player.max_health, |s| s.max_health);
    if let Some(health) = world.get_mut::<Health>(player) {
        *health = Health::full(max_health);
    }
    if let Some(pos) = world.get_mut::<Position>(player) {
        pos.0 = at;
    }
    if let Some(intent) = world.get_mut::<MoveIntent>(player) {
        *intent = MoveIntent::default();
    }
    if let Some(shooter) = world.get_mut::<Shooter>(player) {
        shooter.cooldown = 0.0;
    }
    ctx.commands.enable(player);
    ctx.events.push(PlayerRespawned { player });
    info!(tick = ctx.tick, %player, x = at.x, y = at.y, "player respawned");
    Ok(())
}

fn mass_spawn(world: &mut World, ctx: &mut SimContext, count: u32) -> Result<(), RpcError> {
    if count == 0 {
        return Err(RpcError::EmptySpawnRequest);
    }
    let anchors = alive_players(world);
    if anchors.is_empty() {
        return Err(RpcError::NoSpawnAnchor);
    }
    let (_, anchor) = anchors[ctx.rng.gen_range(0..anchors.len())];
    let requested = count.min(ctx.config.gameplay.mass_spawn_limit);
    let spawned = spawn_ring(world, ctx, anchor, requested);
    if spawned == 0 {
        return Err(RpcError::EnemyCapReached);
    }
    info!(tick = ctx.tick, requested = count, spawned, "mass spawn");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_error_has_a_class() {
        let cases = [
            (RpcError::DebugDisabled, ErrorClass::Protocol),
            (RpcError::UnknownBuff(42), ErrorClass::Protocol),
            (RpcError::NoOpenOffer(EntityId(1)), ErrorClass::InvariantViolation),
            (RpcError::BuffMaxed(BuffType::Damage), ErrorClass::InvariantViolation),
            (RpcError::EnemyCapReached, ErrorClass::ResourceCap),
            (RpcError::UnknownConnection(ConnectionId(3)), ErrorClass::LifecycleRace),
            (RpcError::PlayerGone(EntityId(2)), ErrorClass::LifecycleRace),
        ];
        for (err, class) in cases {
            assert_eq!(err.class(), class, "{err}");
        }
    }

    #[test]
    fn messages_name_the_subject() {
        let err = RpcError::NotOffered {
            player: EntityId(4),
            buff: BuffType::Homing,
        };
        assert_eq!(err.to_string(), "buff homing was not offered to player e4");
    }
}
