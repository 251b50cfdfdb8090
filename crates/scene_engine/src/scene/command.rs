//! Deferred scene mutations
//!
//! Structural changes requested while the scene is being iterated (inside a
//! `view` loop, or from code holding component references) are queued as
//! [`SceneCommand`]s and applied by `Scene::end_frame` before the instancing
//! flush.

use std::fmt;

use crate::ecs::{Component, Entity};

use super::Scene;

/// A queued structural change
pub enum SceneCommand {
    /// Destroy an entity and everything attached to it
    DestroyEntity(Entity),
    /// Remove one component type; built by `SceneCommand::remove_component`
    RemoveComponent {
        /// Target entity
        entity: Entity,
        /// Type-erased removal
        remove: fn(&mut Scene, Entity) -> bool,
    },
    /// Reparent (`Some`) or detach (`None`)
    SetParent {
        /// Entity to move
        child: Entity,
        /// New parent
        parent: Option<Entity>,
    },
    /// Arbitrary mutation
    Custom(Box<dyn FnOnce(&mut Scene)>),
}

impl SceneCommand {
    /// Command removing the entity's `T`
    pub fn remove_component<T: Component>(entity: Entity) -> Self {
        Self::RemoveComponent {
            entity,
            remove: remove_erased::<T>,
        }
    }

    /// Run the command against `scene`
    pub(crate) fn apply(self, scene: &mut Scene) {
        match self {
            Self::DestroyEntity(entity) => {
                scene.destroy_entity(entity);
            }
            Self::RemoveComponent { entity, remove } => {
                remove(scene, entity);
            }
            Self::SetParent { child, parent: Some(parent) } => {
                scene.set_parent(child, parent);
            }
            Self::SetParent { child, parent: None } => {
                scene.remove_parent(child);
            }
            Self::Custom(command) => command(scene),
        }
    }
}

fn remove_erased<T: Component>(scene: &mut Scene, entity: Entity) -> bool {
    scene.remove_component::<T>(entity).is_some()
}

impl fmt::Debug for SceneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DestroyEntity(entity) => f.debug_tuple("DestroyEntity").field(entity).finish(),
            Self::RemoveComponent { entity, .. } => f.debug_struct("RemoveComponent").field("entity", entity).finish(),
            Self::SetParent { child, parent } => f
                .debug_struct("SetParent")
                .field("child", child)
                .field("parent", parent)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
