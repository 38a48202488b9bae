//! Stages 6 and 7: buff offers and their resolution.
//!
//! Per player: `Idle -> Offered` when collected points reach the next
//! threshold, `Offered -> Idle` on a valid selection. Offers never time out;
//! an offer held by a player whose connection is gone is reclaimed by the
//! session lifecycle stage.

use std::collections::BTreeSet;

use horde_shared::{
    buffs::{BuffChoice, BuffLevels, BuffType, OFFER_SIZE},
    components::{PendingOffer, Player, Progression},
    ecs::{EntityId, QueryFilter, World},
    net::ServerRpc,
};
use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info};

use crate::{
    report::{BuffSelected, OfferOpened},
    rpc::{report_dropped, RpcError},
    session::release_selection,
    sim::{SelectionRequest, SimContext},
};

/// Picks `OFFER_SIZE` categories from `eligible`. Distinct when there are
/// enough to choose from; otherwise every eligible category appears and the
/// remaining slots repeat random ones. `None` if nothing is eligible.
pub fn roll_offer<R: Rng + ?Sized>(eligible: &[BuffType], rng: &mut R) -> Option<[BuffType; OFFER_SIZE]> {
    if eligible.is_empty() {
        return None;
    }
    let mut picks: Vec<BuffType> = if eligible.len() >= OFFER_SIZE {
        eligible.choose_multiple(rng, OFFER_SIZE).copied().collect()
    } else {
        let mut all = eligible.to_vec();
        all.shuffle(rng);
        all
    };
    while picks.len() < OFFER_SIZE {
        if let Some(extra) = eligible.choose(rng) {
            picks.push(*extra);
        }
    }
    let mut out = [picks[0]; OFFER_SIZE];
    out.copy_from_slice(&picks[..OFFER_SIZE]);
    Some(out)
}

/// Stage 6.
pub fn run_threshold(world: &mut World, ctx: &mut SimContext) {
    let idle = QueryFilter::new()
        .with::<Progression>()
        .with::<BuffLevels>()
        .without::<PendingOffer>();
    let candidates: Vec<EntityId> = world
        .query_filtered::<Player>(&idle)
        .filter(|(_, p)| p.is_alive())
        .map(|(id, _)| id)
        .collect();

    for player in candidates {
        let (Some(progress), Some(levels), Some(record)) = (
            world.get::<Progression>(player).copied(),
            world.get::<BuffLevels>(player).copied(),
            world.get::<Player>(player).copied(),
        ) else {
            continue;
        };
        let threshold = progress.next_threshold();
        if progress.points < threshold {
            continue;
        }
        let Some(choices) = roll_offer(&levels.eligible(), &mut ctx.rng) else {
            // Every category is maxed: keep the points.
            continue;
        };

        if let Some(p) = world.get_mut::<Progression>(player) {
            p.points -= threshold;
            p.selections += 1;
        }
        ctx.commands.insert(
            player,
            PendingOffer {
                choices,
                opened_tick: ctx.tick,
            },
        );
        ctx.session.selecting_count += 1;

        ctx.channel.broadcast(ServerRpc::GamePause {
            selecting_player: player,
        });
        ctx.channel.send_to(
            record.connection,
            ServerRpc::ShowBuffOffer {
                choices: choices.map(|buff| BuffChoice {
                    buff,
                    current_level: levels.level(buff),
                }),
            },
        );
        ctx.events.push(OfferOpened { player, choices });
        info!(
            tick = ctx.tick,
            %player,
            threshold,
            selecting = ctx.session.selecting_count,
            "buff offer opened"
        );
    }
}

/// Stage 7: resolves queued `SelectBuff` requests in arrival order.
pub fn run_selection(world: &mut World, ctx: &mut SimContext) {
    let mut resolved: BTreeSet<EntityId> = BTreeSet::new();
    while let Some(request) = ctx.pending_selections.pop_front() {
        if let Err(err) = resolve(world, ctx, &request, &mut resolved) {
            report_dropped(ctx, request.connection, "select_buff", &err);
        }
    }
}

fn resolve(
    world: &mut World,
    ctx: &mut SimContext,
    request: &SelectionRequest,
    resolved: &mut BTreeSet<EntityId>,
) -> Result<(), RpcError> {
    let conn = request.connection;
    if !ctx.connections.contains(conn) {
        return Err(RpcError::UnknownConnection(conn));
    }
    let player = ctx
        .connections
        .player_of(conn)
        .ok_or(RpcError::NoPlayer(conn))?;
    if !world.contains(player) {
        return Err(RpcError::PlayerGone(player));
    }
    let buff = BuffType::from_id(request.buff_type_id)
        .ok_or(RpcError::UnknownBuff(request.buff_type_id))?;
    let offer = world
        .get::<PendingOffer>(player)
        .copied()
        .filter(|_| !resolved.contains(&player))
        .ok_or(RpcError::NoOpenOffer(player))?;
    if !offer.contains(buff) {
        return Err(RpcError::NotOffered { player, buff });
    }
    let levels = world
        .get_mut::<BuffLevels>(player)
        .ok_or(RpcError::PlayerGone(player))?;
    if !levels.try_level_up(buff) {
        return Err(RpcError::BuffMaxed(buff));
    }
    let new_level = levels.level(buff);

    resolved.insert(player);
    ctx.commands.remove::<PendingOffer>(player);
    ctx.channel.broadcast(ServerRpc::BuffApplied {
        buff,
        new_level,
        player,
    });
    release_selection(ctx, player);
    ctx.events.push(BuffSelected {
        player,
        buff,
        new_level,
    });
    debug!(
        tick = ctx.tick,
        %player,
        %buff,
        new_level,
        waited = ctx.tick - offer.opened_tick,
        "buff selected"
    );
    Ok(())
}
