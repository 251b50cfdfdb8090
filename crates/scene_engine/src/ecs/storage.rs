//! Component Storage
//!
//! Dense per-type storage: components live contiguously in a `Vec`, a
//! `SecondaryMap` maps each entity to its dense index. Removal swaps the last
//! element into the hole, so indices (and references) are not stable across
//! removals.

use std::any::Any;

use slotmap::SecondaryMap;

use super::{Component, Entity};

/// Type-erased view of a component storage
pub trait AnyStorage {
    /// Downcast helper
    fn as_any(&self) -> &dyn Any;
    /// Mutable downcast helper
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Drop the entity's component, if any
    fn remove_entity(&mut self, entity: Entity) -> bool;
    /// Whether the entity has a component in this storage
    fn contains(&self, entity: Entity) -> bool;
    /// Number of stored components
    fn len(&self) -> usize;
    /// Whether the storage is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sparse-set storage for one component type
pub struct ComponentStorage<T: Component> {
    dense: Vec<T>,
    owners: Vec<Entity>,
    index: SecondaryMap<Entity, usize>,
}

impl<T: Component> ComponentStorage<T> {
    /// Create an empty storage
    pub fn new() -> Self {
        Self {
            dense: Vec::new(),
            owners: Vec::new(),
            index: SecondaryMap::new(),
        }
    }

    /// Insert a component; returns the previous one if the entity had it
    pub fn insert(&mut self, entity: Entity, component: T) -> Option<T> {
        if let Some(&slot) = self.index.get(entity) {
            return Some(std::mem::replace(&mut self.dense[slot], component));
        }
        self.index.insert(entity, self.dense.len());
        self.dense.push(component);
        self.owners.push(entity);
        None
    }

    /// Remove the entity's component
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let slot = self.index.remove(entity)?;
        let last = self.dense.len() - 1;
        if slot != last {
            let moved = self.owners[last];
            self.index.insert(moved, slot);
        }
        self.owners.swap_remove(slot);
        Some(self.dense.swap_remove(slot))
    }

    /// Get a component
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.index.get(entity).map(|&slot| &self.dense[slot])
    }

    /// Get a component mutably
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let slot = *self.index.get(entity)?;
        Some(&mut self.dense[slot])
    }

    /// Iterate `(entity, component)` pairs in dense order
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.owners.iter().copied().zip(self.dense.iter())
    }

    /// Iterate `(entity, component)` pairs mutably in dense order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.owners.iter().copied().zip(self.dense.iter_mut())
    }

    /// Entities owning a component, in dense order
    pub fn entities(&self) -> &[Entity] {
        &self.owners
    }
}

impl<T: Component> Default for ComponentStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Component> AnyStorage for ComponentStorage<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn remove_entity(&mut self, entity: Entity) -> bool {
        self.remove(entity).is_some()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.index.contains_key(entity)
    }

    fn len(&self) -> usize {
        self.dense.len()
    }
}
