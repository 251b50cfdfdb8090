//! Mesh instancing system
//!
//! Single authority for instance group membership. Mesh lifecycle events
//! route entities into the group matching their `(mesh, materials)` key,
//! creating groups on first use and destroying them when their last member
//! leaves. Transform events only mark slots dirty; all GPU work waits for
//! [`MeshInstancingSystem::process_updates`] once per frame.

use std::collections::HashMap;

use slotmap::SlotMap;
use thiserror::Error;

use crate::assets::{AssetLookup, MeshId};
use crate::config::InstancingConfig;
use crate::ecs::components::{MeshComponent, TransformComponent};
use crate::ecs::{ComponentKind, Entity, World};
use crate::events::Event;
use crate::foundation::math::Mat4;
use crate::render::{BufferHandle, GpuBuffers, GpuError, InstanceGroup, InstanceKey, InstancedDraw};

slotmap::new_key_type! {
    /// Instance group identifier
    pub struct GroupId;
}

/// Instancing errors
#[derive(Debug, Error)]
pub enum InstancingError {
    /// A group could not reach the GPU
    #[error("GPU update for mesh {mesh:?} failed")]
    Gpu {
        /// Mesh of the failing group
        mesh: MeshId,
        /// Backend error
        #[source]
        source: GpuError,
    },
}

/// What one `process_updates` call did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Groups that had pending work
    pub groups_flushed: usize,
    /// GPU buffers created
    pub buffers_created: usize,
    /// GPU buffers resized
    pub buffers_resized: usize,
    /// Buffers of destroyed groups released
    pub buffers_released: usize,
    /// `upload_range` calls
    pub ranges: usize,
    /// Bytes uploaded
    pub bytes: usize,
}

/// Lifetime counters of the system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstancingStats {
    /// Groups created
    pub groups_created: usize,
    /// Groups destroyed
    pub groups_destroyed: usize,
    /// Entities moved between groups
    pub resorts: usize,
}

/// Routes mesh entities into instance groups
pub struct MeshInstancingSystem {
    config: InstancingConfig,
    groups: SlotMap<GroupId, InstanceGroup>,
    by_key: HashMap<InstanceKey, GroupId>,
    membership: HashMap<Entity, GroupId>,
    retired: Vec<BufferHandle>,
    stats: InstancingStats,
}

impl MeshInstancingSystem {
    /// Create the system; new groups use `config`
    pub fn new(config: InstancingConfig) -> Self {
        Self {
            config,
            groups: SlotMap::with_key(),
            by_key: HashMap::new(),
            membership: HashMap::new(),
            retired: Vec::new(),
            stats: InstancingStats::default(),
        }
    }

    /// React to one scene event
    pub fn on_event(&mut self, world: &World, event: &Event) {
        match *event {
            Event::ComponentAdded { entity, component: ComponentKind::Mesh, .. }
            | Event::ComponentUpdated { entity, component: ComponentKind::Mesh, .. } => {
                self.sync_entity(world, entity);
            }
            Event::ComponentDeleted { entity, component: ComponentKind::Mesh, .. } => {
                if self.membership.contains_key(&entity) {
                    self.remove_entity(entity);
                }
            }
            Event::TransformUpdated { entity, .. } => {
                self.flag_transform(entity);
            }
            _ => {}
        }
    }

    /// Put `entity` in the group its mesh component asks for, moving it out
    /// of its current group if the key changed. Entities without a drawable
    /// mesh leave instancing altogether.
    pub fn sync_entity(&mut self, world: &World, entity: Entity) {
        let key = world
            .get_component::<MeshComponent>(entity)
            .and_then(MeshComponent::instance_key);
        let current = self.membership.get(&entity).copied();

        if let Some(current) = current {
            if key.as_ref() == self.groups.get(current).map(InstanceGroup::key) {
                return;
            }
            self.remove_entity(entity);
            if key.is_some() {
                self.stats.resorts += 1;
            }
        }

        let Some(key) = key else {
            return;
        };
        let id = match self.by_key.get(&key) {
            Some(&id) => id,
            None => self.create_group(key),
        };
        if let Some(group) = self.groups.get_mut(id) {
            group.add_instance(entity);
            self.membership.insert(entity, id);
        }
    }

    /// Take `entity` out of its group, destroying the group if it empties
    pub fn remove_entity(&mut self, entity: Entity) -> bool {
        let Some(id) = self.membership.remove(&entity) else {
            log::error!("Entity {entity:?} is not in any instance group");
            return false;
        };
        let Some(group) = self.groups.get_mut(id) else {
            log::error!("Entity {entity:?} mapped to missing instance group {id:?}");
            debug_assert!(false, "instance membership points at a destroyed group");
            return false;
        };

        let removed = group.remove_instance(entity);
        if group.is_empty() {
            self.destroy_group(id);
        }
        removed
    }

    /// Mark a member's matrix for upload
    pub fn flag_transform(&mut self, entity: Entity) -> bool {
        match self.membership.get(&entity).and_then(|&id| self.groups.get_mut(id)) {
            Some(group) => group.flag_instance_transform_update(entity),
            None => false,
        }
    }

    /// Release retired buffers and flush every group with pending work
    pub fn process_updates(&mut self, world: &World, gpu: &mut dyn GpuBuffers) -> Result<UploadStats, InstancingError> {
        let mut stats = UploadStats::default();

        for handle in std::mem::take(&mut self.retired) {
            match gpu.destroy(handle) {
                Ok(()) => stats.buffers_released += 1,
                Err(error) => log::warn!("Releasing instance buffer {handle:?} failed: {error}"),
            }
        }

        let matrix_of = |entity: Entity| {
            world
                .get_component::<TransformComponent>(entity)
                .map_or_else(Mat4::identity, |transform| *transform.world_matrix())
        };

        for group in self.groups.values_mut() {
            if !group.has_pending_updates() {
                continue;
            }
            let mesh = group.mesh_id();
            let upload = group
                .process_updates(gpu, matrix_of)
                .map_err(|source| InstancingError::Gpu { mesh, source })?;

            stats.groups_flushed += 1;
            stats.buffers_created += usize::from(upload.created);
            stats.buffers_resized += usize::from(upload.resized);
            stats.ranges += upload.ranges;
            stats.bytes += upload.bytes;
        }
        Ok(stats)
    }

    /// Every live group
    pub fn instance_groups(&self) -> impl Iterator<Item = &InstanceGroup> {
        self.groups.values()
    }

    /// Group by id
    pub fn group(&self, id: GroupId) -> Option<&InstanceGroup> {
        self.groups.get(id)
    }

    /// Group an entity belongs to
    pub fn group_of(&self, entity: Entity) -> Option<&InstanceGroup> {
        self.membership.get(&entity).and_then(|&id| self.groups.get(id))
    }

    /// Id of the group an entity belongs to
    pub fn group_id_of(&self, entity: Entity) -> Option<GroupId> {
        self.membership.get(&entity).copied()
    }

    /// Group serving a key
    pub fn group_by_key(&self, key: &InstanceKey) -> Option<&InstanceGroup> {
        self.by_key.get(key).and_then(|&id| self.groups.get(id))
    }

    /// Number of live groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Buffers waiting to be released at the next flush
    pub fn pending_releases(&self) -> usize {
        self.retired.len()
    }

    /// Lifetime counters
    pub const fn stats(&self) -> &InstancingStats {
        &self.stats
    }

    /// One draw per flushed group whose mesh resolves, ordered by key
    pub fn draw_list(&self, assets: &dyn AssetLookup) -> Vec<InstancedDraw> {
        let mut draws: Vec<InstancedDraw> = self
            .groups
            .values()
            .filter(|group| group.render_count() > 0)
            .filter_map(|group| {
                let Some(instance_buffer) = group.gpu_buffer() else {
                    log::debug!("Group {:?} has not been flushed yet; skipping draw", group.mesh_id());
                    return None;
                };
                let Some(asset) = assets.mesh_asset(group.mesh_id()) else {
                    log::warn!("Mesh {:?} is not registered; skipping draw", group.mesh_id());
                    return None;
                };
                Some(InstancedDraw {
                    mesh: group.mesh_id(),
                    mesh_name: asset.name.clone(),
                    materials: group.material_ids().to_vec(),
                    instance_buffer,
                    instance_count: group.render_count(),
                })
            })
            .collect();
        draws.sort_by(|a, b| (a.mesh, &a.materials).cmp(&(b.mesh, &b.materials)));
        draws
    }

    fn create_group(&mut self, key: InstanceKey) -> GroupId {
        log::debug!("Creating instance group for {:?} with {} materials", key.mesh, key.materials.len());
        let id = self.groups.insert(InstanceGroup::new(key.clone(), self.config));
        self.by_key.insert(key, id);
        self.stats.groups_created += 1;
        id
    }

    fn destroy_group(&mut self, id: GroupId) {
        let Some(mut group) = self.groups.remove(id) else {
            return;
        };
        self.by_key.remove(group.key());
        if let Some(buffer) = group.take_buffer() {
            self.retired.push(buffer);
        }
        self.stats.groups_destroyed += 1;
        log::debug!("Destroyed instance group for {:?}", group.mesh_id());
    }
}
