//! Client-side mirrors of server state.
//!
//! Snapshots are importance-filtered, so a far entity shows up only every
//! second or fourth tick. [`EntityView`] merges them into a last-known state
//! per entity. Pickups are tracked separately from their spawn/collect/
//! destroy notifications, which arrive on the reliable channel.

use std::collections::BTreeMap;

use horde_shared::{
    components::{EntityKind, PickupId},
    ecs::EntityId,
    math::Vec2,
    net::{EntityState, ServerRpc, Snapshot},
};
use tracing::debug;

/// A server pickup as the client knows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirroredPickup {
    pub position: Vec2,
    pub value: u32,
}

/// Pickups keyed by server id.
#[derive(Debug, Default)]
pub struct PickupMirror {
    pickups: BTreeMap<PickupId, MirroredPickup>,
    collected_value: u64,
}

impl PickupMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a pickup notification. Other RPCs are ignored.
    pub fn apply(&mut self, rpc: &ServerRpc) {
        match *rpc {
            ServerRpc::PickupSpawned {
                pickup_id,
                position,
                value,
            } => {
                self.pickups
                    .insert(pickup_id, MirroredPickup { position, value });
            }
            ServerRpc::PickupCollected {
                pickup_id, value, ..
            } => {
                if self.pickups.remove(&pickup_id).is_none() {
                    debug!(?pickup_id, "collect for unknown pickup");
                }
                self.collected_value += u64::from(value);
            }
            ServerRpc::PickupDestroyed { pickup_id, .. } => {
                self.pickups.remove(&pickup_id);
            }
            _ => {}
        }
    }

    pub fn get(&self, id: PickupId) -> Option<&MirroredPickup> {
        self.pickups.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pickups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pickups.is_empty()
    }

    /// Total value collected by anyone since this mirror was created.
    pub fn collected_value(&self) -> u64 {
        self.collected_value
    }

    /// Closest known pickup to `from`.
    pub fn nearest(&self, from: Vec2) -> Option<(PickupId, MirroredPickup)> {
        self.pickups
            .iter()
            .min_by(|a, b| {
                a.1.position
                    .distance_sq(from)
                    .total_cmp(&b.1.position.distance_sq(from))
            })
            .map(|(id, p)| (*id, *p))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    state: EntityState,
    tick: u64,
}

/// Last known state of every replicated entity.
#[derive(Debug)]
pub struct EntityView {
    entities: BTreeMap<EntityId, Seen>,
    last_tick: u64,
    /// Entities unseen for longer than this are dropped.
    stale_after: u64,
}

impl EntityView {
    /// `stale_after` should exceed the slowest send interval.
    pub fn new(stale_after: u64) -> Self {
        Self {
            entities: BTreeMap::new(),
            last_tick: 0,
            stale_after,
        }
    }

    /// Merges a snapshot. Older snapshots than the newest seen are ignored.
    pub fn merge(&mut self, snap: &Snapshot) {
        if snap.tick < self.last_tick {
            return;
        }
        self.last_tick = snap.tick;
        for state in &snap.entities {
            self.entities.insert(
                state.id,
                Seen {
                    state: state.clone(),
                    tick: snap.tick,
                },
            );
        }
        let horizon = self.last_tick.saturating_sub(self.stale_after);
        self.entities.retain(|_, seen| seen.tick >= horizon);
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityState> {
        self.entities.get(&id).map(|s| &s.state)
    }

    /// Tick the entity was last included in a snapshot.
    pub fn last_seen(&self, id: EntityId) -> Option<u64> {
        self.entities.get(&id).map(|s| s.tick)
    }

    pub fn last_tick(&self) -> u64 {
        self.last_tick
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn of_kind(&self, kind: EntityKind) -> impl Iterator<Item = &EntityState> {
        self.entities
            .values()
            .map(|s| &s.state)
            .filter(move |s| s.kind == kind)
    }

    /// Closest known entity of `kind` to `from`.
    pub fn nearest(&self, kind: EntityKind, from: Vec2) -> Option<&EntityState> {
        self.of_kind(kind)
            .min_by(|a, b| a.position.distance_sq(from).total_cmp(&b.position.distance_sq(from)))
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.last_tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u64, kind: EntityKind, x: f32) -> EntityState {
        EntityState {
            id: EntityId(id),
            kind,
            position: Vec2::new(x, 0.0),
            health: None,
        }
    }

    #[test]
    fn pickup_mirror_follows_notifications() {
        let mut mirror = PickupMirror::new();
        for (id, x) in [(1, 1.0), (2, 5.0)] {
            mirror.apply(&ServerRpc::PickupSpawned {
                pickup_id: PickupId(id),
                position: Vec2::new(x, 0.0),
                value: 5,
            });
        }
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror.nearest(Vec2::new(4.0, 0.0)).map(|p| p.0), Some(PickupId(2)));

        mirror.apply(&ServerRpc::PickupCollected {
            pickup_id: PickupId(2),
            position: Vec2::new(5.0, 0.0),
            value: 5,
            collector: EntityId(9),
        });
        mirror.apply(&ServerRpc::PickupDestroyed {
            pickup_id: PickupId(1),
            position: Vec2::new(1.0, 0.0),
            value: 5,
        });
        assert!(mirror.is_empty());
        assert_eq!(mirror.collected_value(), 5);
    }

    #[test]
    fn partial_snapshots_merge_and_go_stale() {
        let mut view = EntityView::new(8);
        view.merge(&Snapshot {
            tick: 1,
            entities: vec![state(1, EntityKind::Player, 0.0), state(2, EntityKind::Enemy, 90.0)],
        });
        view.merge(&Snapshot {
            tick: 2,
            entities: vec![state(1, EntityKind::Player, 1.0)],
        });
        assert_eq!(view.len(), 2, "far enemy kept between its sends");
        assert_eq!(view.get(EntityId(1)).unwrap().position.x, 1.0);
        assert_eq!(view.last_seen(EntityId(2)), Some(1));

        view.merge(&Snapshot {
            tick: 1,
            entities: vec![state(1, EntityKind::Player, -5.0)],
        });
        assert_eq!(view.get(EntityId(1)).unwrap().position.x, 1.0, "out of order ignored");

        view.merge(&Snapshot {
            tick: 12,
            entities: vec![state(1, EntityKind::Player, 2.0)],
        });
        assert!(view.get(EntityId(2)).is_none());
        assert_eq!(
            view.nearest(EntityKind::Player, Vec2::ZERO).map(|s| s.id),
            Some(EntityId(1))
        );
    }
}
