//! ECS World implementation
//!
//! The entity registry: live entities, their names and uuids, and one
//! [`ComponentStorage`] per component type. The world itself has no side
//! effects; lifecycle events and system bookkeeping are driven by `Scene`.

use std::any::TypeId;
use std::collections::HashMap;

use slotmap::SlotMap;

use super::entity::EntityRecord;
use super::storage::{AnyStorage, ComponentStorage};
use super::{Component, Entity, Uuid};

/// ECS World containing all entities and components
pub struct World {
    entities: SlotMap<Entity, EntityRecord>,
    uuids: HashMap<Uuid, Entity>,
    storages: HashMap<TypeId, Box<dyn AnyStorage>>,
}

impl World {
    /// Create a new world
    pub fn new() -> Self {
        Self {
            entities: SlotMap::with_key(),
            uuids: HashMap::new(),
            storages: HashMap::new(),
        }
    }

    /// Create a new entity
    ///
    /// Without an explicit uuid a random one is generated. A duplicate uuid is
    /// accepted but logged; lookups then resolve to the newest entity.
    pub fn create_entity(&mut self, name: impl Into<String>, uuid: Option<Uuid>) -> Entity {
        let uuid = uuid.unwrap_or_else(Uuid::new_random);
        let name = name.into();
        let entity = self.entities.insert(EntityRecord { name, uuid });

        if let Some(previous) = self.uuids.insert(uuid, entity) {
            if self.entities.contains_key(previous) {
                log::warn!("Uuid {uuid} already used by {previous:?}; now resolves to {entity:?}");
            }
        }
        log::trace!("Created entity {entity:?} ({uuid})");
        entity
    }

    /// Remove an entity and every component it still owns.
    ///
    /// No hierarchy or instancing cleanup happens here; `Scene::destroy_entity`
    /// unwinds those before calling this.
    pub(crate) fn despawn(&mut self, entity: Entity) -> bool {
        let Some(record) = self.entities.remove(entity) else {
            return false;
        };
        if self.uuids.get(&record.uuid) == Some(&entity) {
            self.uuids.remove(&record.uuid);
        }
        for storage in self.storages.values_mut() {
            storage.remove_entity(entity);
        }
        true
    }

    /// Whether the handle refers to a live entity
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.contains_key(entity)
    }

    /// Number of live entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Get an iterator over all entities
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.keys()
    }

    /// Display name of an entity
    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.entities.get(entity).map(|record| record.name.as_str())
    }

    /// Rename an entity
    pub fn set_name(&mut self, entity: Entity, name: impl Into<String>) -> bool {
        match self.entities.get_mut(entity) {
            Some(record) => {
                record.name = name.into();
                true
            }
            None => false,
        }
    }

    /// Stable identifier of an entity
    pub fn uuid(&self, entity: Entity) -> Option<Uuid> {
        self.entities.get(entity).map(|record| record.uuid)
    }

    /// Resolve a stable identifier to a live entity
    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<Entity> {
        self.uuids.get(&uuid).copied().filter(|&entity| self.is_alive(entity))
    }

    /// Add a component to an entity
    ///
    /// If the entity already has a `T` the new value is dropped and the
    /// existing component is returned.
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Option<&mut T> {
        if !self.is_alive(entity) {
            log::warn!("add_component::<{}> on dead entity {entity:?}", std::any::type_name::<T>());
            return None;
        }
        let storage = self.storage_mut_or_insert::<T>();
        if storage.get(entity).is_some() {
            log::warn!(
                "Entity {entity:?} already has a {}; keeping the existing one",
                std::any::type_name::<T>()
            );
        } else {
            storage.insert(entity, component);
        }
        storage.get_mut(entity)
    }

    /// Get a component from an entity
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage::<T>()?.get(entity)
    }

    /// Get a mutable component from an entity
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.get_mut(entity)
    }

    /// Whether the entity has a `T`
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.get_component::<T>(entity).is_some()
    }

    /// Remove a component; no-op when absent
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.is_alive(entity) {
            return None;
        }
        self.storage_mut::<T>()?.remove(entity)
    }

    /// Iterate every entity owning a `T`
    pub fn view<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.storage::<T>().into_iter().flat_map(ComponentStorage::iter)
    }

    /// Iterate every entity owning a `T`, mutably
    pub fn view_mut<T: Component>(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.storage_mut::<T>().into_iter().flat_map(ComponentStorage::iter_mut)
    }

    /// Entities owning a `T`, collected so the world can be mutated afterwards
    pub fn entities_with<T: Component>(&self) -> Vec<Entity> {
        self.storage::<T>()
            .map(|storage| storage.entities().to_vec())
            .unwrap_or_default()
    }

    /// Number of `T` components stored
    pub fn component_count<T: Component>(&self) -> usize {
        self.storages.get(&TypeId::of::<T>()).map_or(0, |storage| storage.len())
    }

    fn storage<T: Component>(&self) -> Option<&ComponentStorage<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|storage| storage.as_any().downcast_ref())
    }

    fn storage_mut<T: Component>(&mut self) -> Option<&mut ComponentStorage<T>> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|storage| storage.as_any_mut().downcast_mut())
    }

    fn storage_mut_or_insert<T: Component>(&mut self) -> &mut ComponentStorage<T> {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(ComponentStorage::<T>::new()));
        match storage.as_any_mut().downcast_mut() {
            Some(storage) => storage,
            None => unreachable!("storage registered under the wrong TypeId"),
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
