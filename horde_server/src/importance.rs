//! Replication importance model.
//!
//! Every entity marked [`Replicated`] gets a tier from the squared distance
//! to its nearest observer (an alive player). The tier decides how often the
//! replication front-end sends it:
//!
//! | nearest distance        | tier    | interval |
//! |-------------------------|---------|----------|
//! | `< full_rate_radius`    | Full    | 1        |
//! | `< half_rate_radius`    | Half    | 2        |
//! | otherwise / no observer | Quarter | 4        |
//!
//! A distance exactly on a boundary falls into the slower tier. Scores are
//! rebuilt from scratch every tick; this module performs no I/O.

use std::collections::BTreeMap;

use horde_shared::{
    components::{Player, Position, Replicated},
    config::ImportanceConfig,
    ecs::{EntityId, World},
    math::Vec2,
};

use crate::sim::SimContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImportanceTier {
    Full,
    Half,
    Quarter,
}

impl ImportanceTier {
    /// Send every N ticks.
    pub fn send_interval(self) -> u64 {
        match self {
            ImportanceTier::Full => 1,
            ImportanceTier::Half => 2,
            ImportanceTier::Quarter => 4,
        }
    }

    pub fn from_distance_sq(distance_sq: f32, cfg: &ImportanceConfig) -> Self {
        if distance_sq < cfg.full_rate_radius * cfg.full_rate_radius {
            ImportanceTier::Full
        } else if distance_sq < cfg.half_rate_radius * cfg.half_rate_radius {
            ImportanceTier::Half
        } else {
            ImportanceTier::Quarter
        }
    }

    /// True if an entity at this tier is due on `tick`. The entity id offsets
    /// the phase so slower tiers spread across ticks instead of bunching.
    pub fn is_due(self, entity: EntityId, tick: u64) -> bool {
        tick.wrapping_add(entity.0) % self.send_interval() == 0
    }
}

/// Per-tick importance scores.
#[derive(Debug, Default)]
pub struct ImportanceTable {
    tiers: BTreeMap<EntityId, ImportanceTier>,
    observers: Vec<(EntityId, Vec2)>,
}

impl ImportanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds every score from current positions.
    pub fn recompute(&mut self, world: &World, cfg: &ImportanceConfig) {
        self.observers = observers(world);
        self.tiers.clear();
        for (id, _) in world.query::<Replicated>() {
            let Some(pos) = world.get::<Position>(id) else {
                continue;
            };
            let tier = self
                .observers
                .iter()
                .map(|(_, at)| pos.0.distance_sq(*at))
                .reduce(f32::min)
                .map_or(ImportanceTier::Quarter, |d2| {
                    ImportanceTier::from_distance_sq(d2, cfg)
                });
            self.tiers.insert(id, tier);
        }
    }

    /// Tier from the last recompute; unscored entities are Quarter.
    pub fn tier(&self, entity: EntityId) -> ImportanceTier {
        self.tiers
            .get(&entity)
            .copied()
            .unwrap_or(ImportanceTier::Quarter)
    }

    pub fn should_send(&self, entity: EntityId, tick: u64) -> bool {
        self.tier(entity).is_due(entity, tick)
    }

    /// Tier of `entity` as seen by one observer rather than the nearest one.
    /// Returns `None` if either entity has no position.
    pub fn tier_for_observer(
        world: &World,
        entity: EntityId,
        observer: EntityId,
        cfg: &ImportanceConfig,
    ) -> Option<ImportanceTier> {
        let a = world.get::<Position>(entity)?;
        let b = world.get::<Position>(observer)?;
        Some(ImportanceTier::from_distance_sq(a.0.distance_sq(b.0), cfg))
    }

    pub fn scored(&self) -> impl Iterator<Item = (EntityId, ImportanceTier)> + '_ {
        self.tiers.iter().map(|(id, tier)| (*id, *tier))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn clear(&mut self) {
        self.tiers.clear();
        self.observers.clear();
    }
}

fn observers(world: &World) -> Vec<(EntityId, Vec2)> {
    world
        .query::<Player>()
        .filter(|(_, p)| p.is_alive())
        .filter_map(|(id, _)| world.get::<Position>(id).map(|pos| (id, pos.0)))
        .collect()
}

/// Stage 9.
pub fn run(world: &mut World, ctx: &mut SimContext) {
    ctx.importance.recompute(world, &ctx.config.importance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use horde_shared::{components::EntityKind, net::ConnectionId};

    fn cfg() -> ImportanceConfig {
        ImportanceConfig::default()
    }

    #[test]
    fn boundaries_take_the_slower_tier() {
        let cfg = cfg();
        let tier = |d: f32| ImportanceTier::from_distance_sq(d * d, &cfg);
        assert_eq!(tier(49.0), ImportanceTier::Full);
        assert_eq!(tier(50.0), ImportanceTier::Half);
        assert_eq!(tier(99.9), ImportanceTier::Half);
        assert_eq!(tier(100.0), ImportanceTier::Quarter);
        assert_eq!(tier(150.0), ImportanceTier::Quarter);
    }

    #[test]
    fn quarter_rate_is_staggered_by_id() {
        let due: Vec<u64> = (0..8)
            .filter(|t| ImportanceTier::Quarter.is_due(EntityId(1), *t))
            .collect();
        assert_eq!(due, vec![3, 7]);
        assert!((0..8).all(|t| ImportanceTier::Full.is_due(EntityId(5), t)));
    }

    #[test]
    fn nearest_observer_wins_and_no_observer_means_quarter() {
        let mut world = World::new();
        let enemy = world.spawn();
        world.insert(enemy, Position(Vec2::new(120.0, 0.0))).unwrap();
        world.insert(enemy, Replicated { kind: EntityKind::Enemy }).unwrap();

        let mut table = ImportanceTable::new();
        table.recompute(&world, &cfg());
        assert_eq!(table.tier(enemy), ImportanceTier::Quarter);
        assert_eq!(table.observer_count(), 0);

        let far = world.spawn();
        world.insert(far, Position(Vec2::ZERO)).unwrap();
        world.insert(far, Player::new(ConnectionId(1))).unwrap();
        let near = world.spawn();
        world.insert(near, Position(Vec2::new(100.0, 0.0))).unwrap();
        world.insert(near, Player::new(ConnectionId(2))).unwrap();

        table.recompute(&world, &cfg());
        assert_eq!(table.tier(enemy), ImportanceTier::Full);
        assert_eq!(
            ImportanceTable::tier_for_observer(&world, enemy, far, &cfg()),
            Some(ImportanceTier::Quarter)
        );

        // A disabled (dead) observer stops counting.
        world.set_enabled(near, false).unwrap();
        table.recompute(&world, &cfg());
        assert_eq!(table.tier(enemy), ImportanceTier::Quarter);
    }
}
