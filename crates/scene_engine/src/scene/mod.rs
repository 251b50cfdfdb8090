//! # Scene
//!
//! Owner of one entity registry and the systems that keep it consistent.
//! Every mutation goes through the scene so the side effects line up:
//!
//! ```text
//! Scene::set_position ──► TransformHierarchySystem (rebuild subtree)
//!                              │ TransformUpdated per rebuilt transform
//!                              ▼
//!                         MeshInstancingSystem (mark slots dirty)
//!                              │
//!                              ▼
//!                         EventManager (external listeners)
//!
//! Scene::end_frame ──► deferred commands ──► instance group flush (GPU)
//! ```
//!
//! Events are routed to the instancing system first and then published on the
//! shared [`EventManager`]. Listeners only receive the event, never the scene,
//! so nothing can re-enter a scene while it is mutating itself; structural
//! changes requested during iteration go through [`SceneCommand`].

mod command;
#[cfg(test)]
mod tests;

pub use command::SceneCommand;

use std::rc::Rc;

use crate::assets::{AssetError, AssetLoadQueue, AssetLookup, MaterialId, MeshId};
use crate::config::SceneConfig;
use crate::ecs::components::{
    HierarchyLinks, LightComponent, LightInstance, MeshComponent, TransformComponent, TransformUpdate,
};
use crate::ecs::systems::{InstancingError, MeshInstancingSystem, TransformHierarchySystem, UploadStats};
use crate::ecs::{Component, ComponentKind, Entity, Uuid, World};
use crate::events::{Event, EventManager, SceneId};
use crate::foundation::math::{Mat4, Quat, Transform, Vec3};
use crate::render::{GpuBuffers, InstancedDraw};

/// What one `end_frame` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Deferred commands applied
    pub commands_applied: usize,
    /// Loaded meshes applied since the previous frame
    pub loads_applied: usize,
    /// Instance buffer work
    pub upload: UploadStats,
    /// Live entities after the frame
    pub entity_count: usize,
    /// Live instance groups after the frame
    pub group_count: usize,
}

/// A scene: entities, components, hierarchy and instancing
pub struct Scene {
    id: SceneId,
    name: String,
    config: SceneConfig,
    bus: Rc<EventManager>,

    world: World,
    hierarchy: TransformHierarchySystem,
    instancing: MeshInstancingSystem,

    commands: Vec<SceneCommand>,
    loads_applied: usize,
}

impl Scene {
    /// Create an empty scene publishing on `bus`
    pub fn new(name: impl Into<String>, bus: Rc<EventManager>, config: SceneConfig) -> Self {
        let id = bus.allocate_scene_id();
        let name = name.into();
        log::info!("Created scene '{name}' ({id:?})");
        Self {
            id,
            name,
            instancing: MeshInstancingSystem::new(config.instancing),
            config,
            bus,
            world: World::new(),
            hierarchy: TransformHierarchySystem::new(),
            commands: Vec::new(),
            loads_applied: 0,
        }
    }

    /// Scene identifier carried by every event it publishes
    pub const fn id(&self) -> SceneId {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration the scene was built with
    pub const fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Shared event bus
    pub const fn bus(&self) -> &Rc<EventManager> {
        &self.bus
    }

    /// Read access to the registry
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// Hierarchy system (statistics)
    pub const fn hierarchy(&self) -> &TransformHierarchySystem {
        &self.hierarchy
    }

    /// Instancing system (groups for the renderer)
    pub const fn instancing(&self) -> &MeshInstancingSystem {
        &self.instancing
    }

    /// Create an entity with a random uuid
    pub fn create_entity(&mut self, name: impl Into<String>) -> Entity {
        self.spawn(name.into(), None)
    }

    /// Create an entity with a known uuid (loading a saved scene)
    pub fn create_entity_with_uuid(&mut self, name: impl Into<String>, uuid: Uuid) -> Entity {
        self.spawn(name.into(), Some(uuid))
    }

    fn spawn(&mut self, name: String, uuid: Option<Uuid>) -> Entity {
        let entity = self.world.create_entity(name, uuid);
        self.emit(Event::EntityCreated { scene: self.id, entity });
        if self.config.create_default_transform {
            self.add_component(entity, TransformComponent::default());
        }
        entity
    }

    /// Destroy an entity.
    ///
    /// Children are detached and keep their current world pose; built-in
    /// components are removed one by one so their `ComponentDeleted` events
    /// fire while the data is still present. Other components are dropped
    /// with the entity.
    pub fn destroy_entity(&mut self, entity: Entity) -> bool {
        if !self.world.is_alive(entity) {
            log::warn!("destroy_entity: {entity:?} is not alive");
            return false;
        }

        self.remove_component::<MeshComponent>(entity);
        self.remove_component::<LightComponent>(entity);
        self.remove_component::<TransformComponent>(entity);

        self.world.despawn(entity);
        self.emit(Event::EntityDestroyed { scene: self.id, entity });
        log::debug!("Destroyed entity {entity:?} in scene '{}'", self.name);
        true
    }

    /// Whether the handle refers to a live entity
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.world.is_alive(entity)
    }

    /// Resolve a stable identifier
    pub fn find_by_uuid(&self, uuid: Uuid) -> Option<Entity> {
        self.world.find_by_uuid(uuid)
    }

    /// Attach a component and publish `ComponentAdded`.
    ///
    /// A duplicate is logged and the existing component returned without an
    /// event. Changes after insertion go through [`Scene::modify_component`].
    pub fn add_component<T: Component>(&mut self, entity: Entity, component: T) -> Option<&T> {
        if !self.world.is_alive(entity) {
            log::warn!("add_component::<{}>: {entity:?} is not alive", std::any::type_name::<T>());
            return None;
        }
        if self.world.has_component::<T>(entity) {
            log::warn!(
                "add_component::<{}>: {entity:?} already has one",
                std::any::type_name::<T>()
            );
            return self.world.get_component::<T>(entity);
        }

        self.world.add_component(entity, component);
        let mut rebuilt = Vec::new();
        if T::KIND == ComponentKind::Transform {
            if let Some(transform) = self.world.get_component_mut::<TransformComponent>(entity) {
                transform.links = HierarchyLinks::default();
            }
            self.hierarchy
                .on_transform_updated(&mut self.world, self.id, entity, TransformUpdate::LOCAL, &mut rebuilt);
        }

        self.emit(Event::ComponentAdded { scene: self.id, entity, component: T::KIND });
        self.emit_all(rebuilt);
        self.world.get_component::<T>(entity)
    }

    /// Read a component
    pub fn get_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.world.get_component(entity)
    }

    /// Whether the entity has a `T`
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.world.has_component::<T>(entity)
    }

    /// Remove a component.
    ///
    /// `ComponentDeleted` is published while the component still exists;
    /// removing a transform detaches its children first, and an instanced
    /// mesh left without a transform is uploaded with an identity matrix at
    /// the next flush.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if !self.world.has_component::<T>(entity) {
            return None;
        }

        self.emit(Event::ComponentDeleted { scene: self.id, entity, component: T::KIND });
        if T::KIND == ComponentKind::Transform {
            let mut rebuilt = Vec::new();
            self.hierarchy.unlink(&mut self.world, self.id, entity, &mut rebuilt);
            self.emit_all(rebuilt);
        }
        let removed = self.world.remove_component::<T>(entity);
        if T::KIND == ComponentKind::Transform {
            // A mesh without a transform is drawn at the origin
            self.instancing.flag_transform(entity);
        }
        removed
    }

    /// Mutate a component in place and publish `ComponentUpdated`.
    ///
    /// Transforms are rebuilt with their subtree and keep their place in the
    /// hierarchy even if the closure replaces the whole component; meshes are
    /// re-routed to the matching instance group.
    pub fn modify_component<T, R>(&mut self, entity: Entity, modify: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Component,
    {
        // Hierarchy links belong to the hierarchy system, not to the caller
        let before = if T::KIND == ComponentKind::Transform {
            self.transform(entity).map(|t| (t.links, t.is_absolute()))
        } else {
            None
        };

        let result = modify(self.world.get_component_mut::<T>(entity)?);

        let mut update = TransformUpdate::LOCAL;
        if let Some((links, was_absolute)) = before {
            if let Some(transform) = self.world.get_component_mut::<TransformComponent>(entity) {
                transform.links = links;
                if transform.is_absolute() != was_absolute {
                    update |= TransformUpdate::ABSOLUTE;
                }
            }
        }

        self.emit(Event::ComponentUpdated { scene: self.id, entity, component: T::KIND });
        if T::KIND == ComponentKind::Transform {
            self.rebuild_transform(entity, update);
        }
        Some(result)
    }

    /// Iterate every entity owning a `T`.
    ///
    /// The scene is borrowed for the whole loop; queue structural changes with
    /// [`Scene::defer`] and friends.
    pub fn view<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.world.view::<T>()
    }

    /// Set the local position
    pub fn set_position(&mut self, entity: Entity, position: Vec3) -> bool {
        self.update_transform(entity, TransformUpdate::POSITION, |t| t.set_position(position))
    }

    /// Set the local orientation
    pub fn set_orientation(&mut self, entity: Entity, orientation: Quat) -> bool {
        self.update_transform(entity, TransformUpdate::ROTATION, |t| t.set_orientation(orientation))
    }

    /// Set the local scale
    pub fn set_scale(&mut self, entity: Entity, scale: Vec3) -> bool {
        self.update_transform(entity, TransformUpdate::SCALE, |t| t.set_scale(scale))
    }

    /// Replace the whole local pose
    pub fn set_local_transform(&mut self, entity: Entity, local: Transform) -> bool {
        self.update_transform(entity, TransformUpdate::LOCAL, |t| t.set_local(local))
    }

    /// Make the transform ignore (or follow again) its parent
    pub fn set_absolute(&mut self, entity: Entity, is_absolute: bool) -> bool {
        let mut rebuilt = Vec::new();
        let changed = self
            .hierarchy
            .set_absolute(&mut self.world, self.id, entity, is_absolute, &mut rebuilt);
        self.emit_all(rebuilt);
        changed
    }

    /// Attach `child` under `parent`; refuses cycles and self-parenting
    pub fn set_parent(&mut self, child: Entity, parent: Entity) -> bool {
        let mut rebuilt = Vec::new();
        let attached = self.hierarchy.set_parent(&mut self.world, self.id, child, parent, &mut rebuilt);
        self.emit_all(rebuilt);
        attached
    }

    /// Detach `child` from its parent, keeping its world pose
    pub fn remove_parent(&mut self, child: Entity) -> bool {
        let mut rebuilt = Vec::new();
        let detached = self.hierarchy.remove_parent(&mut self.world, self.id, child, &mut rebuilt);
        self.emit_all(rebuilt);
        detached
    }

    /// Parent of `entity`
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        TransformHierarchySystem::parent(&self.world, entity)
    }

    /// Direct children of `entity` in sibling order
    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        TransformHierarchySystem::children(&self.world, entity)
    }

    /// Ancestors of `entity`, nearest first
    pub fn ancestors(&self, entity: Entity) -> Vec<Entity> {
        TransformHierarchySystem::ancestors(&self.world, entity)
    }

    /// Transform component of `entity`
    pub fn transform(&self, entity: Entity) -> Option<&TransformComponent> {
        self.world.get_component(entity)
    }

    /// Cached world matrix
    pub fn world_matrix(&self, entity: Entity) -> Option<Mat4> {
        self.transform(entity).map(|transform| *transform.world_matrix())
    }

    /// World-space position
    pub fn absolute_position(&self, entity: Entity) -> Option<Vec3> {
        self.transform(entity).map(TransformComponent::world_position)
    }

    /// Scale accumulated along the parent chain
    pub fn absolute_scale(&self, entity: Entity) -> Option<Vec3> {
        TransformHierarchySystem::absolute_scale(&self.world, entity)
    }

    /// Orientation accumulated along the parent chain
    pub fn absolute_orientation(&self, entity: Entity) -> Option<Quat> {
        TransformHierarchySystem::absolute_orientation(&self.world, entity)
    }

    fn update_transform(
        &mut self,
        entity: Entity,
        update: TransformUpdate,
        modify: impl FnOnce(&mut TransformComponent),
    ) -> bool {
        let Some(transform) = self.world.get_component_mut::<TransformComponent>(entity) else {
            log::warn!("{entity:?} has no transform");
            return false;
        };
        modify(transform);
        self.rebuild_transform(entity, update);
        true
    }

    fn rebuild_transform(&mut self, entity: Entity, update: TransformUpdate) {
        let mut rebuilt = Vec::new();
        self.hierarchy
            .on_transform_updated(&mut self.world, self.id, entity, update, &mut rebuilt);
        self.emit_all(rebuilt);
    }

    /// Point the entity at a mesh, adding a mesh component if needed. The
    /// material list is left as is.
    pub fn set_mesh(&mut self, entity: Entity, mesh: Option<MeshId>) -> bool {
        if self.world.has_component::<MeshComponent>(entity) {
            self.modify_component::<MeshComponent, _>(entity, |m| m.mesh = mesh).is_some()
        } else {
            let component = MeshComponent { mesh, ..MeshComponent::default() };
            self.add_component(entity, component).is_some()
        }
    }

    /// Point the entity at a registered mesh and size its material list to
    /// the mesh's submesh count, padding with the default material
    pub fn assign_mesh(&mut self, entity: Entity, mesh: MeshId, assets: &dyn AssetLookup) -> Result<bool, AssetError> {
        let submesh_count = assets.mesh_asset(mesh).ok_or(AssetError::UnknownMesh(mesh))?.submesh_count;
        if !self.world.is_alive(entity) {
            return Ok(false);
        }

        let update = |m: &mut MeshComponent| {
            m.mesh = Some(mesh);
            m.fit_materials_to(submesh_count, MaterialId::DEFAULT);
        };
        if self.world.has_component::<MeshComponent>(entity) {
            Ok(self.modify_component(entity, update).is_some())
        } else {
            let mut component = MeshComponent::default();
            update(&mut component);
            Ok(self.add_component(entity, component).is_some())
        }
    }

    /// Replace the material list
    pub fn set_materials(&mut self, entity: Entity, materials: Vec<MaterialId>) -> bool {
        self.modify_component::<MeshComponent, _>(entity, |m| m.materials = materials)
            .is_some()
    }

    /// Replace one material slot
    pub fn set_material(&mut self, entity: Entity, slot: usize, material: MaterialId) -> bool {
        let in_range = self
            .world
            .get_component::<MeshComponent>(entity)
            .is_some_and(|m| slot < m.materials.len());
        if !in_range {
            log::warn!("set_material: {entity:?} has no material slot {slot}");
            return false;
        }
        self.modify_component::<MeshComponent, _>(entity, |m| m.materials[slot] = material)
            .is_some()
    }

    /// Show or hide the mesh; hidden meshes leave their instance group
    pub fn set_mesh_visible(&mut self, entity: Entity, visible: bool) -> bool {
        self.modify_component::<MeshComponent, _>(entity, |m| m.visible = visible)
            .is_some()
    }

    /// Apply meshes finished by loader threads.
    ///
    /// Results for entities destroyed in the meantime, or that no longer have
    /// a mesh component, are dropped.
    pub fn apply_loaded_meshes(&mut self, queue: &AssetLoadQueue) -> usize {
        let mut applied = 0;
        for loaded in queue.drain() {
            if !self.world.has_component::<MeshComponent>(loaded.entity) {
                log::debug!("Dropping loaded mesh {:?} for {:?}: entity or mesh component gone", loaded.mesh, loaded.entity);
                continue;
            }
            let materials = loaded.materials;
            self.modify_component::<MeshComponent, _>(loaded.entity, |m| {
                m.mesh = Some(loaded.mesh);
                m.materials = materials;
            });
            applied += 1;
        }
        self.loads_applied += applied;
        applied
    }

    /// Queue a command for the next `end_frame`
    pub fn defer(&mut self, command: SceneCommand) {
        self.commands.push(command);
    }

    /// Queue an entity destruction
    pub fn defer_destroy(&mut self, entity: Entity) {
        self.defer(SceneCommand::DestroyEntity(entity));
    }

    /// Queue a component removal
    pub fn defer_remove_component<T: Component>(&mut self, entity: Entity) {
        self.defer(SceneCommand::remove_component::<T>(entity));
    }

    /// Queue a reparent (`Some`) or detach (`None`)
    pub fn defer_set_parent(&mut self, child: Entity, parent: Option<Entity>) {
        self.defer(SceneCommand::SetParent { child, parent });
    }

    /// Queue an arbitrary mutation
    pub fn defer_fn(&mut self, command: impl FnOnce(&mut Self) + 'static) {
        self.defer(SceneCommand::Custom(Box::new(command)));
    }

    /// Commands waiting for `end_frame`
    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Run queued commands now. Commands queued while these run wait for the
    /// next call.
    pub fn apply_commands(&mut self) -> usize {
        let commands = std::mem::take(&mut self.commands);
        let count = commands.len();
        for command in commands {
            log::trace!("Applying {command:?}");
            command.apply(self);
        }
        count
    }

    /// Apply deferred commands and flush instance groups to the GPU
    pub fn end_frame(&mut self, gpu: &mut dyn GpuBuffers) -> Result<FrameStats, InstancingError> {
        let commands_applied = self.apply_commands();
        let upload = self.instancing.process_updates(&self.world, gpu)?;
        let stats = FrameStats {
            commands_applied,
            loads_applied: std::mem::take(&mut self.loads_applied),
            upload,
            entity_count: self.world.entity_count(),
            group_count: self.instancing.group_count(),
        };
        log::trace!("Scene '{}' frame: {stats:?}", self.name);
        Ok(stats)
    }

    /// One instanced draw per flushed group
    pub fn draw_list(&self, assets: &dyn AssetLookup) -> Vec<InstancedDraw> {
        self.instancing.draw_list(assets)
    }

    /// Enabled lights in world space
    pub fn collect_lights(&self) -> Vec<LightInstance> {
        self.world
            .view::<LightComponent>()
            .filter(|(_, light)| light.enabled)
            .map(|(entity, light)| {
                let transform = self.transform(entity);
                LightInstance {
                    kind: light.kind,
                    position: transform.map_or_else(Vec3::zeros, TransformComponent::world_position),
                    direction: transform.map_or_else(|| -Vec3::z(), TransformComponent::forward),
                    color: light.color,
                    intensity: light.intensity,
                    range: light.range,
                    inner_cone: light.inner_cone,
                    outer_cone: light.outer_cone,
                    cast_shadows: light.cast_shadows,
                }
            })
            .collect()
    }

    fn emit(&mut self, event: Event) {
        self.instancing.on_event(&self.world, &event);
        self.bus.publish(event);
    }

    fn emit_all(&mut self, events: Vec<Event>) {
        for event in events {
            self.emit(event);
        }
    }
}
