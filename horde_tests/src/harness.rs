//! Scripted driver for a headless [`Simulation`].
//!
//! Connections are plain ids; the harness pushes the same inbound items the
//! network front-end would and steps the simulation directly.

use horde_server::{channel::Delivery, channel::InboundKind, sim::Simulation, TickReport};
use horde_shared::{
    buffs::BuffLevels,
    components::{
        EntityKind, Enemy, Health, PendingOffer, Pickup, Player, Position, Progression,
        Projectile, Replicated,
    },
    config::EngineConfig,
    ecs::EntityId,
    math::Vec2,
    net::{ClientRpc, ConnectionId, PlayerInput, ServerRpc},
};

pub struct SimHarness {
    sim: Simulation,
    next_connection: u32,
}

impl Default for SimHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHarness {
    /// Default config with a fixed seed.
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            seed: 42,
            ..Default::default()
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            sim: Simulation::new(config),
            next_connection: 1,
        }
    }

    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    /// Registers a new connection without spawning a player.
    pub fn connect(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.sim.push_inbound(id, InboundKind::Connected);
        id
    }

    pub fn ready(&mut self, conn: ConnectionId) {
        self.sim.push_inbound(conn, InboundKind::Ready);
    }

    /// Connects and readies in one go; the player exists after the next step.
    pub fn join(&mut self) -> ConnectionId {
        let conn = self.connect();
        self.ready(conn);
        conn
    }

    pub fn leave(&mut self, conn: ConnectionId) {
        self.sim.push_inbound(conn, InboundKind::Disconnected);
    }

    pub fn input(&mut self, conn: ConnectionId, input: PlayerInput) {
        self.sim.push_inbound(conn, InboundKind::Input(input));
    }

    pub fn rpc(&mut self, conn: ConnectionId, rpc: ClientRpc) {
        self.sim.push_inbound(conn, InboundKind::Rpc(rpc));
    }

    pub fn step(&mut self) -> TickReport {
        self.sim.step()
    }

    pub fn step_n(&mut self, n: usize) -> Vec<TickReport> {
        (0..n).map(|_| self.sim.step()).collect()
    }

    pub fn flush(&mut self) -> Vec<Delivery> {
        self.sim.flush_outbound()
    }

    pub fn player(&self, conn: ConnectionId) -> Option<EntityId> {
        self.sim.connections().player_of(conn)
    }

    pub fn player_record(&self, conn: ConnectionId) -> Option<Player> {
        self.sim.world().get::<Player>(self.player(conn)?).copied()
    }

    pub fn points(&self, conn: ConnectionId) -> u32 {
        self.player(conn)
            .and_then(|p| self.sim.world().get::<Progression>(p))
            .map_or(0, |p| p.points)
    }

    pub fn progression(&self, conn: ConnectionId) -> Option<Progression> {
        self.sim.world().get::<Progression>(self.player(conn)?).copied()
    }

    pub fn levels(&self, conn: ConnectionId) -> Option<BuffLevels> {
        self.sim.world().get::<BuffLevels>(self.player(conn)?).copied()
    }

    pub fn offer(&self, conn: ConnectionId) -> Option<PendingOffer> {
        self.sim.world().get::<PendingOffer>(self.player(conn)?).copied()
    }

    pub fn position_of(&self, entity: EntityId) -> Option<Vec2> {
        self.sim.world().get::<Position>(entity).map(|p| p.0)
    }

    /// Teleports an entity.
    pub fn place(&mut self, entity: EntityId, at: Vec2) {
        if let Some(pos) = self.sim.world_mut().get_mut::<Position>(entity) {
            pos.0 = at;
        }
    }

    /// Inserts a stationary enemy immediately.
    pub fn spawn_enemy_at(&mut self, at: Vec2, health: f32) -> EntityId {
        let tuning = self.sim.config().gameplay.enemy.clone();
        let world = self.sim.world_mut();
        let id = world.spawn();
        let parts = [
            world.insert(id, Position(at)),
            world.insert(id, Health::full(health)),
            world.insert(
                id,
                Enemy {
                    speed: 0.0,
                    contact_damage: tuning.contact_damage,
                    contact_cooldown: 0.0,
                    target: None,
                },
            ),
            world.insert(
                id,
                Replicated {
                    kind: EntityKind::Enemy,
                },
            ),
        ];
        assert!(parts.iter().all(Result::is_ok));
        id
    }

    /// Inserts a motionless projectile immediately.
    pub fn spawn_projectile_at(&mut self, at: Vec2, damage: f32, owner: EntityId) -> EntityId {
        let world = self.sim.world_mut();
        let id = world.spawn();
        let parts = [
            world.insert(id, Position(at)),
            world.insert(
                id,
                Projectile {
                    owner,
                    direction: Vec2::new(1.0, 0.0),
                    speed: 0.0,
                    lifetime: 5.0,
                    damage,
                    homing: None,
                },
            ),
        ];
        assert!(parts.iter().all(Result::is_ok));
        id
    }

    /// Inserts a settled pickup immediately.
    pub fn spawn_pickup_at(&mut self, at: Vec2, value: u32) -> EntityId {
        let pickup_id = self.sim.context_mut().next_pickup_id();
        let world = self.sim.world_mut();
        let id = world.spawn();
        let parts = [
            world.insert(id, Position(at)),
            world.insert(
                id,
                Pickup {
                    id: pickup_id,
                    value,
                },
            ),
            world.insert(
                id,
                Replicated {
                    kind: EntityKind::Pickup,
                },
            ),
        ];
        assert!(parts.iter().all(Result::is_ok));
        id
    }
}

/// RPCs delivered to `conn` that match `pred`.
pub fn delivered_to<F>(deliveries: &[Delivery], conn: ConnectionId, pred: F) -> Vec<ServerRpc>
where
    F: Fn(&ServerRpc) -> bool,
{
    deliveries
        .iter()
        .filter(|d| d.to == conn && pred(&d.rpc))
        .map(|d| d.rpc.clone())
        .collect()
}
