//! Gameplay components stored in the [`World`](crate::ecs::World).
//!
//! Relationships between entities are plain [`EntityId`] values (a
//! projectile's owner, an enemy's target). They are non-owning and may dangle;
//! readers must treat a missing target as "gone".

use serde::{Deserialize, Serialize};

use crate::{
    buffs::{buff_threshold, BuffType, StatModifiers, OFFER_SIZE},
    ecs::EntityId,
    math::Vec2,
    net::ConnectionId,
};

/// World-space position on the arena plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position(pub Vec2);

/// Hit points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Health {
    pub fn full(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn is_depleted(&self) -> bool {
        self.current <= 0.0
    }

    /// Subtracts `amount` and returns true if this hit depleted the pool.
    pub fn apply_damage(&mut self, amount: f32) -> bool {
        let was_alive = !self.is_depleted();
        self.current -= amount.max(0.0);
        was_alive && self.is_depleted()
    }

    pub fn heal(&mut self, amount: f32) {
        self.current = (self.current + amount.max(0.0)).min(self.max);
    }
}

/// Whether a player is in play. Death keeps the entity so identity survives
/// respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerStatus {
    Alive,
    Dead { since_tick: u64 },
}

/// Player record. `connection` is the back-reference into the connection
/// index; it dangles once the peer disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    pub connection: ConnectionId,
    pub status: PlayerStatus,
}

impl Player {
    pub fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            status: PlayerStatus::Alive,
        }
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.status, PlayerStatus::Alive)
    }
}

/// Most recent movement/aim intent received from the owning client.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveIntent {
    pub movement: Vec2,
    pub aim: Vec2,
    pub fire: bool,
}

/// Seconds until the player may fire again.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Shooter {
    pub cooldown: f32,
}

/// Collected points and how many offers have opened (thresholds crossed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progression {
    pub points: u32,
    pub selections: u32,
}

impl Progression {
    pub fn next_threshold(&self) -> u32 {
        buff_threshold(self.selections)
    }
}

/// Effective player stats: base tuning with buff modifiers applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerStats {
    pub modifiers: StatModifiers,
    pub max_health: f32,
    pub move_speed: f32,
    pub fire_interval: f32,
    pub damage: f32,
    pub projectile_speed: f32,
    pub magnet_radius: f32,
    pub regen_per_sec: f32,
    pub homing_turn_rate: f32,
}

/// An open buff offer. A player carries at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOffer {
    pub choices: [BuffType; OFFER_SIZE],
    pub opened_tick: u64,
}

impl PendingOffer {
    pub fn contains(&self, buff: BuffType) -> bool {
        self.choices.contains(&buff)
    }
}

/// Hostile mob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Enemy {
    pub speed: f32,
    pub contact_damage: f32,
    /// Seconds until this enemy may deal contact damage again.
    pub contact_cooldown: f32,
    pub target: Option<EntityId>,
}

/// Projectile steering toward a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homing {
    pub target: EntityId,
    pub turn_rate: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    pub owner: EntityId,
    pub direction: Vec2,
    pub speed: f32,
    /// Seconds left before the projectile expires.
    pub lifetime: f32,
    pub damage: f32,
    pub homing: Option<Homing>,
}

/// Stable pickup id, shared with clients that only see replicated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PickupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pickup {
    pub id: PickupId,
    pub value: u32,
}

/// Physical settle state of a freshly dropped pickup. A pickup without this
/// component has settled and is magnet-eligible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickupMotion {
    pub velocity: Vec2,
    /// Height above the ground plane.
    pub height: f32,
    pub vertical_speed: f32,
    pub bounces_left: u8,
}

/// What kind of thing a replicated entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Enemy,
    Projectile,
    Pickup,
}

/// Marks an entity as mirrored to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicated {
    pub kind: EntityKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lethal_hit_reports_once() {
        let mut hp = Health::full(10.0);
        assert!(!hp.apply_damage(6.0));
        assert!(hp.apply_damage(6.0));
        assert!(!hp.apply_damage(6.0), "already depleted");
    }

    #[test]
    fn heal_clamps_to_max() {
        let mut hp = Health { current: 95.0, max: 100.0 };
        hp.heal(20.0);
        assert_eq!(hp.current, 100.0);
    }

    #[test]
    fn progression_threshold_follows_selections() {
        let mut p = Progression::default();
        assert_eq!(p.next_threshold(), 10);
        p.selections = 3;
        assert_eq!(p.next_threshold(), 30);
    }
}
