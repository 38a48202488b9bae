//! Gameplay events and the per-tick report built from them.
//!
//! Stages push these onto the tick's [`EventBus`]; [`TickReport::collect`]
//! drains the bus once the tick's stages have run.

use horde_shared::{
    buffs::{BuffType, OFFER_SIZE},
    components::PickupId,
    ecs::EntityId,
    event::EventBus,
    math::Vec2,
    net::ConnectionId,
};

use crate::{rpc::ErrorClass, session::SessionPhase};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnemyKilled {
    pub enemy: EntityId,
    pub by: EntityId,
    pub position: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnemySpawned {
    pub enemy: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickupDropped {
    pub pickup: PickupId,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickupClaimed {
    pub pickup: PickupId,
    pub collector: EntityId,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOpened {
    pub player: EntityId,
    pub choices: [BuffType; OFFER_SIZE],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuffSelected {
    pub player: EntityId,
    pub buff: BuffType,
    pub new_level: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerSpawned {
    pub player: EntityId,
    pub connection: ConnectionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerDied {
    pub player: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerRespawned {
    pub player: EntityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// A client request that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcDropped {
    pub connection: ConnectionId,
    pub rpc: &'static str,
    pub class: ErrorClass,
    pub reason: String,
}

/// What happened during one simulation step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Gameplay stages were frozen for a buff selection.
    pub paused: bool,
    pub kills: Vec<EnemyKilled>,
    pub enemies_spawned: usize,
    pub pickups_dropped: Vec<PickupDropped>,
    pub pickups_claimed: Vec<PickupClaimed>,
    pub offers_opened: Vec<OfferOpened>,
    pub selections: Vec<BuffSelected>,
    pub players_spawned: Vec<PlayerSpawned>,
    pub deaths: Vec<PlayerDied>,
    pub respawns: Vec<PlayerRespawned>,
    pub transitions: Vec<SessionTransition>,
    pub dropped_rpcs: Vec<RpcDropped>,
}

impl TickReport {
    /// Drains this tick's events off the bus.
    pub fn collect(tick: u64, paused: bool, events: &mut EventBus) -> Self {
        let report = Self {
            tick,
            paused,
            kills: events.drain(),
            enemies_spawned: events.drain::<EnemySpawned>().len(),
            pickups_dropped: events.drain(),
            pickups_claimed: events.drain(),
            offers_opened: events.drain(),
            selections: events.drain(),
            players_spawned: events.drain(),
            deaths: events.drain(),
            respawns: events.drain(),
            transitions: events.drain(),
            dropped_rpcs: events.drain(),
        };
        events.clear();
        report
    }

    pub fn points_claimed(&self) -> u32 {
        self.pickups_claimed.iter().map(|p| p.value).sum()
    }

    pub fn reset_happened(&self) -> bool {
        self.transitions
            .iter()
            .any(|t| t.to == SessionPhase::Resetting)
    }
}
