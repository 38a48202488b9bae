//! Entity/component store.
//!
//! A deliberately small ECS for a deterministic, single-writer simulation.
//! It is not archetype-based: each component type lives in its own typed
//! storage keyed by entity id. Storages are `BTreeMap`s so iteration order is
//! always ascending entity id, which keeps stage output reproducible.
//!
//! Structural changes made while a stage is iterating go through
//! [`Commands`] and are applied at the next sync point with [`World::apply`].
//! In-place edits through [`World::get_mut`] are immediate.
//!
//! Entities can be disabled without being destroyed. Disabled entities keep
//! their components but are skipped by queries unless the filter opts in.

use std::{
    any::{Any, TypeId},
    collections::{BTreeMap, HashMap},
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Errors returned by store operations on ids that do not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EcsError {
    #[error("entity {0} not found")]
    NotFound(EntityId),
}

/// Anything that can be attached to an entity.
pub trait Component: 'static + Send + Sync {}

impl<T: 'static + Send + Sync> Component for T {}

trait ComponentStorage: Send + Sync {
    fn remove_entity(&mut self, entity: EntityId);
    fn contains(&self, entity: EntityId) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ComponentStorage for BTreeMap<EntityId, T> {
    fn remove_entity(&mut self, entity: EntityId) {
        self.remove(&entity);
    }

    fn contains(&self, entity: EntityId) -> bool {
        self.contains_key(&entity)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EntityMeta {
    disabled: bool,
}

/// How a query treats disabled entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisabledFilter {
    #[default]
    Exclude,
    Include,
    Only,
}

/// Component-set filter for queries.
///
/// ```ignore
/// let filter = QueryFilter::new().with::<Enemy>().without::<PickupMotion>();
/// for (id, pos) in world.query_filtered::<Position>(&filter) { /* ... */ }
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    with: Vec<TypeId>,
    without: Vec<TypeId>,
    disabled: DisabledFilter,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity must also have component `T`.
    pub fn with<T: Component>(mut self) -> Self {
        self.with.push(TypeId::of::<T>());
        self
    }

    /// Entity must not have component `T`.
    pub fn without<T: Component>(mut self) -> Self {
        self.without.push(TypeId::of::<T>());
        self
    }

    /// Match enabled and disabled entities alike.
    pub fn include_disabled(mut self) -> Self {
        self.disabled = DisabledFilter::Include;
        self
    }

    /// Match disabled entities only.
    pub fn only_disabled(mut self) -> Self {
        self.disabled = DisabledFilter::Only;
        self
    }

    fn matches(&self, world: &World, entity: EntityId) -> bool {
        let Some(meta) = world.entities.get(&entity) else {
            return false;
        };
        let disabled_ok = match self.disabled {
            DisabledFilter::Exclude => !meta.disabled,
            DisabledFilter::Include => true,
            DisabledFilter::Only => meta.disabled,
        };
        disabled_ok
            && self.with.iter().all(|t| world.storage_contains(*t, entity))
            && !self.without.iter().any(|t| world.storage_contains(*t, entity))
    }
}

/// Entity store with typed component storages.
#[derive(Default)]
pub struct World {
    next_id: AtomicU64,
    entities: BTreeMap<EntityId, EntityMeta>,
    storages: HashMap<TypeId, Box<dyn ComponentStorage>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty, enabled entity immediately.
    pub fn spawn(&mut self) -> EntityId {
        let id = self.reserve_entity();
        self.entities.insert(id, EntityMeta::default());
        id
    }

    /// Allocates an id without creating the entity. Pair with
    /// [`Commands::spawn`] to create it at the next sync point.
    pub fn reserve_entity(&self) -> EntityId {
        EntityId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns true if the entity exists (enabled or disabled).
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    /// Returns true if the entity exists and is enabled.
    pub fn is_enabled(&self, entity: EntityId) -> bool {
        self.entities.get(&entity).is_some_and(|m| !m.disabled)
    }

    /// Enables or disables an entity. Components are kept either way.
    pub fn set_enabled(&mut self, entity: EntityId, enabled: bool) -> Result<(), EcsError> {
        let meta = self
            .entities
            .get_mut(&entity)
            .ok_or(EcsError::NotFound(entity))?;
        meta.disabled = !enabled;
        Ok(())
    }

    /// Destroys an entity and every component attached to it.
    pub fn despawn(&mut self, entity: EntityId) -> Result<(), EcsError> {
        if self.entities.remove(&entity).is_none() {
            return Err(EcsError::NotFound(entity));
        }
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity);
        }
        Ok(())
    }

    /// Number of live entities, enabled or not.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Inserts/replaces a component for an existing entity.
    pub fn insert<T: Component>(&mut self, entity: EntityId, component: T) -> Result<(), EcsError> {
        if !self.contains(entity) {
            return Err(EcsError::NotFound(entity));
        }

        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(BTreeMap::<EntityId, T>::new()));

        let storage = storage
            .as_any_mut()
            .downcast_mut::<BTreeMap<EntityId, T>>()
            .expect("storage type mismatch");

        storage.insert(entity, component);
        Ok(())
    }

    /// Removes a component, returning it if it was present.
    pub fn remove<T: Component>(&mut self, entity: EntityId) -> Option<T> {
        self.storage_mut::<T>()
            .and_then(|storage| storage.remove(&entity))
    }

    /// Returns true if the entity exists and carries component `T`.
    pub fn has<T: Component>(&self, entity: EntityId) -> bool {
        self.contains(entity) && self.storage_contains(TypeId::of::<T>(), entity)
    }

    /// Gets a component reference.
    pub fn get<T: Component>(&self, entity: EntityId) -> Option<&T> {
        self.storage::<T>().and_then(|storage| storage.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: Component>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storage_mut::<T>()
            .and_then(|storage| storage.get_mut(&entity))
    }

    /// Iterates enabled entities with component `T`.
    pub fn query<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.storage::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(k, v)| (*k, v)))
            .filter(move |(id, _)| self.is_enabled(*id))
    }

    /// Iterates entities with component `T` that also satisfy `filter`.
    pub fn query_filtered<'w, T: Component>(
        &'w self,
        filter: &'w QueryFilter,
    ) -> impl Iterator<Item = (EntityId, &'w T)> + 'w {
        self.storage::<T>()
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(k, v)| (*k, v)))
            .filter(move |(id, _)| filter.matches(self, *id))
    }

    /// Collects the ids matching `filter`, in ascending order. Use this to
    /// pick targets before mutating them with [`World::get_mut`].
    pub fn matching(&self, filter: &QueryFilter) -> Vec<EntityId> {
        self.entities
            .keys()
            .copied()
            .filter(|id| filter.matches(self, *id))
            .collect()
    }

    /// Counts enabled entities carrying component `T`.
    pub fn count<T: Component>(&self) -> usize {
        self.query::<T>().count()
    }

    /// Applies deferred structural changes in the order they were recorded.
    /// Returns the number of commands that took effect.
    pub fn apply(&mut self, commands: &mut Commands) -> usize {
        let mut applied = 0;
        for command in commands.queue.drain(..) {
            let result = match command {
                Command::Spawn(id) => {
                    self.entities.entry(id).or_default();
                    Ok(())
                }
                Command::Despawn(id) => self.despawn(id),
                Command::SetEnabled(id, enabled) => self.set_enabled(id, enabled),
                Command::Edit(_, edit) => edit(self),
            };
            match result {
                Ok(()) => applied += 1,
                Err(e) => debug!(error = %e, "deferred command skipped"),
            }
        }
        applied
    }

    fn storage<T: Component>(&self) -> Option<&BTreeMap<EntityId, T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<BTreeMap<EntityId, T>>())
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut BTreeMap<EntityId, T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<BTreeMap<EntityId, T>>())
    }

    fn storage_contains(&self, type_id: TypeId, entity: EntityId) -> bool {
        self.storages
            .get(&type_id)
            .is_some_and(|storage| storage.contains(entity))
    }
}

type EditFn = Box<dyn FnOnce(&mut World) -> Result<(), EcsError> + Send>;

enum Command {
    Spawn(EntityId),
    Despawn(EntityId),
    SetEnabled(EntityId, bool),
    Edit(EntityId, EditFn),
}

/// Buffer of structural changes, applied at a sync point.
#[derive(Default)]
pub struct Commands {
    queue: Vec<Command>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues creation of a reserved entity (see [`World::reserve_entity`]).
    pub fn spawn(&mut self, id: EntityId) -> EntityCommands<'_> {
        self.queue.push(Command::Spawn(id));
        EntityCommands { id, commands: self }
    }

    /// Returns a builder that queues edits for an existing entity.
    pub fn entity(&mut self, id: EntityId) -> EntityCommands<'_> {
        EntityCommands { id, commands: self }
    }

    pub fn despawn(&mut self, id: EntityId) {
        self.queue.push(Command::Despawn(id));
    }

    pub fn insert<T: Component>(&mut self, id: EntityId, component: T) {
        self.queue.push(Command::Edit(
            id,
            Box::new(move |world: &mut World| world.insert(id, component)),
        ));
    }

    pub fn remove<T: Component>(&mut self, id: EntityId) {
        self.queue.push(Command::Edit(
            id,
            Box::new(move |world: &mut World| {
                if world.contains(id) {
                    world.remove::<T>(id);
                    Ok(())
                } else {
                    Err(EcsError::NotFound(id))
                }
            }),
        ));
    }

    pub fn disable(&mut self, id: EntityId) {
        self.queue.push(Command::SetEnabled(id, false));
    }

    pub fn enable(&mut self, id: EntityId) {
        self.queue.push(Command::SetEnabled(id, true));
    }

    /// Returns true if a despawn is already queued for `id`.
    pub fn despawn_queued(&self, id: EntityId) -> bool {
        self.queue
            .iter()
            .any(|c| matches!(c, Command::Despawn(queued) if *queued == id))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Per-entity command builder.
pub struct EntityCommands<'a> {
    id: EntityId,
    commands: &'a mut Commands,
}

impl EntityCommands<'_> {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn insert<T: Component>(self, component: T) -> Self {
        self.commands.insert(self.id, component);
        self
    }

    pub fn remove<T: Component>(self) -> Self {
        self.commands.remove::<T>(self.id);
        self
    }
}
