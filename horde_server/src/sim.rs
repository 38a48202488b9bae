//! Authoritative simulation.
//!
//! [`Simulation`] owns the [`World`] and the [`SimContext`] every stage
//! receives. One call to [`Simulation::step`] runs stages 1-9 in
//! [`StageId::ORDER`], applying the deferred command buffer after each one.
//! Stage 10 is [`Simulation::flush_outbound`], which the caller may run once
//! after several catch-up steps.
//!
//! Determinism notes:
//! - The RNG is seeded from config; no wall-clock reads happen in stages.
//! - Queries iterate in ascending entity id order.
//! - Inbound requests are handled in arrival order.

use std::collections::VecDeque;

use horde_shared::{
    components::{Health, PickupId, Player, Position, Replicated},
    config::EngineConfig,
    ecs::{Commands, EntityId, QueryFilter, World},
    event::EventBus,
    math::Vec2,
    net::{ConnectionId, EntityState, Snapshot},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::trace;

use crate::{
    channel::{Channel, Delivery, InboundKind},
    connections::ConnectionRegistry,
    importance::{self, ImportanceTable},
    report::TickReport,
    session::{self, GameSessionState},
    stages::{self, spawn::Spawner},
};

/// Simulation stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Intake,
    Stats,
    Movement,
    Combat,
    Pickups,
    BuffThreshold,
    BuffSelection,
    Lifecycle,
    Importance,
    OutboundFlush,
}

impl StageId {
    pub const ORDER: [StageId; 10] = [
        StageId::Intake,
        StageId::Stats,
        StageId::Movement,
        StageId::Combat,
        StageId::Pickups,
        StageId::BuffThreshold,
        StageId::BuffSelection,
        StageId::Lifecycle,
        StageId::Importance,
        StageId::OutboundFlush,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StageId::Intake => "intake",
            StageId::Stats => "stats",
            StageId::Movement => "movement",
            StageId::Combat => "combat",
            StageId::Pickups => "pickups",
            StageId::BuffThreshold => "buff_threshold",
            StageId::BuffSelection => "buff_selection",
            StageId::Lifecycle => "lifecycle",
            StageId::Importance => "importance",
            StageId::OutboundFlush => "outbound_flush",
        }
    }

    /// Stages frozen while a buff selection holds the game paused.
    pub fn pauses_with_selection(self) -> bool {
        matches!(self, StageId::Movement | StageId::Combat | StageId::Pickups)
    }
}

/// A `SelectBuff` request waiting for the selection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequest {
    pub connection: ConnectionId,
    pub buff_type_id: u8,
}

/// Everything a stage may touch besides the world.
pub struct SimContext {
    pub config: EngineConfig,
    /// Tick currently being simulated; 0 before the first step.
    pub tick: u64,
    pub dt: f32,
    pub rng: StdRng,
    pub session: GameSessionState,
    pub connections: ConnectionRegistry,
    pub channel: Channel,
    pub commands: Commands,
    pub events: EventBus,
    pub pending_selections: VecDeque<SelectionRequest>,
    pub importance: ImportanceTable,
    pub spawner: Spawner,
    next_pickup_id: u32,
}

impl SimContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            dt: config.dt(),
            rng: StdRng::seed_from_u64(config.seed),
            config,
            tick: 0,
            session: GameSessionState::default(),
            connections: ConnectionRegistry::new(),
            channel: Channel::new(),
            commands: Commands::new(),
            events: EventBus::default(),
            pending_selections: VecDeque::new(),
            importance: ImportanceTable::new(),
            spawner: Spawner::default(),
            next_pickup_id: 1,
        }
    }

    /// True while gameplay is frozen for a buff selection.
    pub fn gameplay_paused(&self) -> bool {
        self.config.gameplay.pause_during_selection && self.session.selecting_count > 0
    }

    pub fn next_pickup_id(&mut self) -> PickupId {
        let id = PickupId(self.next_pickup_id);
        self.next_pickup_id = self.next_pickup_id.wrapping_add(1).max(1);
        id
    }

    /// One of the configured spawn points, chosen at random.
    pub fn random_spawn_point(&mut self) -> Vec2 {
        let points = &self.config.gameplay.spawn_points;
        if points.is_empty() {
            return Vec2::ZERO;
        }
        points[self.rng.gen_range(0..points.len())]
    }
}

pub struct Simulation {
    world: World,
    ctx: SimContext,
}

impl Simulation {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            world: World::new(),
            ctx: SimContext::new(config),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SimContext {
        &mut self.ctx
    }

    pub fn tick(&self) -> u64 {
        self.ctx.tick
    }

    pub fn session(&self) -> &GameSessionState {
        &self.ctx.session
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.ctx.connections
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Live config; gameplay changes take effect on the next step.
    pub fn config_mut(&mut self) -> &mut EngineConfig {
        &mut self.ctx.config
    }

    pub fn push_inbound(&mut self, from: ConnectionId, kind: InboundKind) {
        self.ctx.channel.push_inbound(from, kind);
    }

    /// Sends the session through a reset on the next lifecycle run.
    pub fn request_reset(&mut self) {
        self.ctx.session.reset_requested = true;
    }

    /// Runs stages 1-9 for one tick.
    pub fn step(&mut self) -> TickReport {
        self.ctx.tick += 1;
        let mut paused = false;
        for stage in StageId::ORDER {
            if stage == StageId::OutboundFlush {
                continue;
            }
            if stage.pauses_with_selection() && self.ctx.gameplay_paused() {
                paused = true;
                continue;
            }
            self.run_stage(stage);
        }
        TickReport::collect(self.ctx.tick, paused, &mut self.ctx.events)
    }

    fn run_stage(&mut self, stage: StageId) {
        trace!(tick = self.ctx.tick, stage = stage.name(), "run stage");
        let world = &mut self.world;
        let ctx = &mut self.ctx;
        match stage {
            StageId::Intake => stages::intake::run(world, ctx),
            StageId::Stats => stages::stats::run(world, ctx),
            StageId::Movement => stages::movement::run(world, ctx),
            StageId::Combat => stages::combat::run(world, ctx),
            StageId::Pickups => stages::pickups::run(world, ctx),
            StageId::BuffThreshold => stages::progression::run_threshold(world, ctx),
            StageId::BuffSelection => stages::progression::run_selection(world, ctx),
            StageId::Lifecycle => session::run(world, ctx),
            StageId::Importance => importance::run(world, ctx),
            StageId::OutboundFlush => return,
        }
        let applied = self.world.apply(&mut self.ctx.commands);
        if applied > 0 {
            trace!(stage = stage.name(), applied, "applied deferred commands");
        }
        self.ctx.spawner.queued = 0;
    }

    /// Stage 10: expands and hands over every RPC queued since the last
    /// flush.
    pub fn flush_outbound(&mut self) -> Vec<Delivery> {
        trace!(
            tick = self.ctx.tick,
            stage = StageId::OutboundFlush.name(),
            "run stage"
        );
        self.ctx.channel.flush(&self.ctx.connections)
    }

    /// Importance-filtered view of the world for one in-session connection.
    ///
    /// Tiers are taken relative to the connection's own player while it is
    /// alive, and from the nearest observer otherwise. The connection's own
    /// player is always included.
    pub fn snapshot_for(&self, connection: ConnectionId) -> Option<Snapshot> {
        let conn = self.ctx.connections.get(connection)?;
        if !conn.in_session {
            return None;
        }
        let own = conn.player;
        let observer = own.filter(|p| {
            self.world.is_enabled(*p)
                && self.world.get::<Player>(*p).is_some_and(Player::is_alive)
        });
        let tick = self.ctx.tick;
        let cfg = &self.ctx.config.importance;

        let filter = QueryFilter::new().include_disabled();
        let entities = self
            .world
            .query_filtered::<Replicated>(&filter)
            .filter(|(id, _)| {
                if Some(*id) == own {
                    return true;
                }
                if !self.world.is_enabled(*id) {
                    return false;
                }
                let tier = observer
                    .and_then(|obs| ImportanceTable::tier_for_observer(&self.world, *id, obs, cfg))
                    .unwrap_or_else(|| self.ctx.importance.tier(*id));
                tier.is_due(*id, tick)
            })
            .filter_map(|(id, rep)| self.entity_state(id, rep))
            .collect();
        Some(Snapshot { tick, entities })
    }

    fn entity_state(&self, id: EntityId, rep: &Replicated) -> Option<EntityState> {
        let position = self.world.get::<Position>(id)?.0;
        Some(EntityState {
            id,
            kind: rep.kind,
            position,
            health: self.world.get::<Health>(id).map(|h| h.current),
        })
    }
}
