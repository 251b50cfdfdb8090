//! Instance groups
//!
//! An [`InstanceGroup`] batches every entity that draws the same mesh with the
//! same material list. Each member owns a slot in a packed array of model
//! matrices that mirrors one GPU buffer, so the whole group renders with a
//! single instanced draw.
//!
//! # Slot layout
//!
//! ```text
//! slot:     0    1    2    3    4   | 5 .. capacity
//!          [A]  [x]  [C]  [D]  [x]  | unused
//!                ^tombstone        ^used_end
//! ```
//!
//! Slots in `[0, used_end)` are either live or tombstones. Tombstones hold a
//! zero-scale matrix so the instanced draw can cover the whole used range
//! without drawing them. New members take the lowest tombstone first; when too
//! many accumulate the group compacts by moving tail members into the holes.

use std::collections::{BTreeSet, HashMap};

use bytemuck::{Pod, Zeroable};

use crate::assets::{MaterialId, MeshId};
use crate::config::InstancingConfig;
use crate::ecs::Entity;
use crate::foundation::math::{zero_scale_matrix, Mat4};

use super::gpu::{BufferHandle, GpuBuffers, GpuError};

/// Per-instance data as laid out in the GPU buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceTransformRaw {
    /// Model matrix, column-major
    pub model: [[f32; 4]; 4],
}

impl InstanceTransformRaw {
    /// Size of one instance record in bytes
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Record for a world matrix
    pub fn from_matrix(matrix: &Mat4) -> Self {
        Self { model: (*matrix).into() }
    }

    /// Record that draws nothing
    pub fn zero_scale() -> Self {
        Self::from_matrix(&zero_scale_matrix())
    }

    /// Back to a matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from(self.model)
    }

    /// Whether the record collapses every vertex
    pub fn is_zero_scale(&self) -> bool {
        self.model[..3].iter().all(|column| column[..3].iter().all(|&v| v == 0.0))
    }
}

/// Grouping key: one mesh plus its full material list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    /// Shared mesh
    pub mesh: MeshId,
    /// One material per submesh
    pub materials: Vec<MaterialId>,
}

/// What one `process_updates` call sent to the GPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupUpload {
    /// A buffer was created
    pub created: bool,
    /// The buffer was resized
    pub resized: bool,
    /// Number of `upload_range` calls
    pub ranges: usize,
    /// Bytes uploaded
    pub bytes: usize,
}

/// Lifetime counters of a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Successful `add_instance` calls
    pub instances_added: usize,
    /// Successful `remove_instance` calls
    pub instances_removed: usize,
    /// Capacity growths
    pub growths: usize,
    /// Compaction passes
    pub compactions: usize,
}

/// A batch of entities sharing mesh and materials
pub struct InstanceGroup {
    key: InstanceKey,
    config: InstancingConfig,

    slots: HashMap<Entity, u32>,
    owners: Vec<Option<Entity>>,
    staging: Vec<InstanceTransformRaw>,
    tombstones: BTreeSet<u32>,
    dirty: BTreeSet<u32>,
    capacity: u32,

    buffer: Option<BufferHandle>,
    buffer_capacity: u32,

    stats: GroupStats,
}

impl InstanceGroup {
    /// Create an empty group. No GPU buffer exists until the first flush.
    pub fn new(key: InstanceKey, config: InstancingConfig) -> Self {
        let capacity = config.initial_capacity.max(1);
        Self {
            key,
            config,
            slots: HashMap::new(),
            owners: Vec::new(),
            staging: vec![InstanceTransformRaw::zero_scale(); capacity as usize],
            tombstones: BTreeSet::new(),
            dirty: BTreeSet::new(),
            capacity,
            buffer: None,
            buffer_capacity: 0,
            stats: GroupStats::default(),
        }
    }

    /// Add an entity, returning its slot
    pub fn add_instance(&mut self, entity: Entity) -> u32 {
        if let Some(&slot) = self.slots.get(&entity) {
            log::warn!("Entity {entity:?} is already in instance group {:?} (slot {slot})", self.key.mesh);
            return slot;
        }

        let slot = if let Some(slot) = self.tombstones.pop_first() {
            self.owners[slot as usize] = Some(entity);
            slot
        } else {
            let slot = self.render_count();
            if slot >= self.capacity {
                self.grow(slot + 1);
            }
            self.owners.push(Some(entity));
            slot
        };

        self.slots.insert(entity, slot);
        self.dirty.insert(slot);
        self.stats.instances_added += 1;
        slot
    }

    /// Remove an entity; `false` if it was not a member
    pub fn remove_instance(&mut self, entity: Entity) -> bool {
        let Some(slot) = self.slots.remove(&entity) else {
            log::error!("Entity {entity:?} is not in instance group {:?}", self.key.mesh);
            return false;
        };
        self.stats.instances_removed += 1;

        if slot + 1 == self.render_count() {
            self.owners.pop();
            self.trim_tail();
        } else {
            self.owners[slot as usize] = None;
            self.tombstones.insert(slot);
            self.dirty.insert(slot);
            if self.tombstones.len() > self.config.tombstone_limit as usize {
                self.compact();
            }
        }
        true
    }

    /// Mark a member's matrix for upload; `false` if it is not a member
    pub fn flag_instance_transform_update(&mut self, entity: Entity) -> bool {
        match self.slots.get(&entity) {
            Some(&slot) => {
                self.dirty.insert(slot);
                true
            }
            None => false,
        }
    }

    /// Refresh staged matrices for dirty slots and push them to the GPU.
    ///
    /// Allocates (or grows) the GPU buffer when it lags the logical capacity
    /// and then uploads the whole used range once; otherwise uploads dirty
    /// slots as coalesced ranges.
    pub fn process_updates<F>(&mut self, gpu: &mut dyn GpuBuffers, mut matrix_of: F) -> Result<GroupUpload, GpuError>
    where
        F: FnMut(Entity) -> Mat4,
    {
        let used_end = self.render_count();
        for &slot in self.dirty.range(..used_end) {
            self.staging[slot as usize] = match self.owners[slot as usize] {
                Some(entity) => InstanceTransformRaw::from_matrix(&matrix_of(entity)),
                None => InstanceTransformRaw::zero_scale(),
            };
        }

        let mut upload = GroupUpload::default();
        let handle = match self.buffer {
            Some(handle) if self.buffer_capacity >= self.capacity => handle,
            existing => {
                let bytes = self.capacity as usize * InstanceTransformRaw::SIZE;
                let handle = if let Some(handle) = existing {
                    gpu.resize(handle, bytes)?;
                    upload.resized = true;
                    handle
                } else {
                    let handle = gpu.create_buffer(bytes)?;
                    upload.created = true;
                    handle
                };
                self.buffer = Some(handle);
                self.buffer_capacity = self.capacity;
                log::debug!(
                    "Instance buffer for {:?} now holds {} instances",
                    self.key.mesh,
                    self.capacity
                );

                // Everything below used_end goes up in one write
                self.dirty.clear();
                self.dirty.extend(0..used_end);
                handle
            }
        };

        for (start, end) in self.dirty_ranges(used_end) {
            let data: &[u8] = bytemuck::cast_slice(&self.staging[start as usize..end as usize]);
            gpu.upload_range(handle, start as usize * InstanceTransformRaw::SIZE, data)?;
            upload.ranges += 1;
            upload.bytes += data.len();
        }
        self.dirty.clear();
        Ok(upload)
    }

    /// Number of instances the draw call must cover (live + tombstones)
    pub fn render_count(&self) -> u32 {
        self.owners.len() as u32
    }

    /// Live members
    pub fn live_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Tombstoned slots inside the used range
    pub fn tombstone_count(&self) -> u32 {
        self.tombstones.len() as u32
    }

    /// Whether the group has no live members
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Grouping key
    pub const fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Shared mesh
    pub const fn mesh_id(&self) -> MeshId {
        self.key.mesh
    }

    /// Materials, one per submesh
    pub fn material_ids(&self) -> &[MaterialId] {
        &self.key.materials
    }

    /// Slot of a member
    pub fn slot_of(&self, entity: Entity) -> Option<u32> {
        self.slots.get(&entity).copied()
    }

    /// Whether the entity is a member
    pub fn contains(&self, entity: Entity) -> bool {
        self.slots.contains_key(&entity)
    }

    /// Members in slot order
    pub fn members(&self) -> impl Iterator<Item = (u32, Entity)> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter_map(|(slot, owner)| owner.map(|entity| (slot as u32, entity)))
    }

    /// Logical capacity in instances
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// GPU buffer, once the group has been flushed
    pub const fn gpu_buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Whether slots are waiting for upload
    pub fn has_pending_updates(&self) -> bool {
        !self.dirty.is_empty() || self.buffer_capacity < self.capacity
    }

    /// CPU mirror of one slot
    pub fn staged_matrix(&self, slot: u32) -> Option<Mat4> {
        if slot >= self.render_count() {
            return None;
        }
        self.staging.get(slot as usize).map(InstanceTransformRaw::to_matrix)
    }

    /// Lifetime counters
    pub const fn stats(&self) -> &GroupStats {
        &self.stats
    }

    /// Hand the GPU buffer over for destruction
    pub fn take_buffer(&mut self) -> Option<BufferHandle> {
        self.buffer_capacity = 0;
        self.buffer.take()
    }

    fn grow(&mut self, required: u32) {
        let scaled = (self.capacity as f32 * self.config.growth_factor).ceil() as u32;
        let new_capacity = required.max(scaled);
        log::debug!(
            "Growing instance group {:?}: {} -> {new_capacity}",
            self.key.mesh,
            self.capacity
        );
        self.staging.resize(new_capacity as usize, InstanceTransformRaw::zero_scale());
        self.capacity = new_capacity;
        self.stats.growths += 1;
    }

    /// Drop trailing tombstones so `used_end` ends on a live slot
    fn trim_tail(&mut self) {
        while let Some(None) = self.owners.last() {
            self.owners.pop();
            self.tombstones.remove(&self.render_count());
        }
        let used_end = self.render_count();
        self.dirty.retain(|&slot| slot < used_end);
    }

    fn compact(&mut self) {
        let live = self.live_count();
        let holes: Vec<u32> = self.tombstones.range(..live).copied().collect();
        let movers: Vec<(u32, Entity)> = self.members().filter(|&(slot, _)| slot >= live).collect();

        if holes.len() != movers.len() {
            log::error!(
                "Instance group {:?} slot table is inconsistent: {} holes, {} movers",
                self.key.mesh,
                holes.len(),
                movers.len()
            );
            debug_assert!(false, "instance slot table corrupted");
            return;
        }

        for (hole, (from, entity)) in holes.into_iter().zip(movers) {
            self.owners[hole as usize] = Some(entity);
            self.owners[from as usize] = None;
            self.staging[hole as usize] = self.staging[from as usize];
            self.slots.insert(entity, hole);
            self.dirty.insert(hole);
        }

        self.owners.truncate(live as usize);
        self.tombstones.clear();
        self.dirty.retain(|&slot| slot < live);
        self.stats.compactions += 1;
        log::debug!("Compacted instance group {:?} to {live} slots", self.key.mesh);
    }

    /// Dirty slots below `used_end` as half-open ranges, merging runs whose
    /// gap is at most `upload_merge_gap`
    fn dirty_ranges(&self, used_end: u32) -> Vec<(u32, u32)> {
        let gap = self.config.upload_merge_gap;
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for &slot in self.dirty.range(..used_end) {
            match ranges.last_mut() {
                Some((_, end)) if slot - *end <= gap => *end = slot + 1,
                _ => ranges.push((slot, slot + 1)),
            }
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::render::gpu::HeadlessGpu;
    use slotmap::SlotMap;

    fn entities(count: usize) -> Vec<Entity> {
        let mut keys: SlotMap<Entity, ()> = SlotMap::with_key();
        (0..count).map(|_| keys.insert(())).collect()
    }

    fn group(config: InstancingConfig) -> InstanceGroup {
        InstanceGroup::new(InstanceKey { mesh: MeshId(1), materials: vec![MaterialId(2)] }, config)
    }

    fn read_records(bytes: &[u8]) -> Vec<InstanceTransformRaw> {
        bytes
            .chunks_exact(InstanceTransformRaw::SIZE)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    fn translation(x: f32) -> Mat4 {
        Mat4::new_translation(&Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_slots_unique_and_packed() {
        let members = entities(5);
        let mut group = group(InstancingConfig::default());

        let slots: Vec<u32> = members.iter().map(|&e| group.add_instance(e)).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);
        assert_eq!(group.render_count(), 5);

        assert_eq!(group.add_instance(members[2]), 2);
        assert_eq!(group.live_count(), 5);
    }

    #[test]
    fn test_removed_slot_reused() {
        let members = entities(6);
        let mut group = group(InstancingConfig::default());
        for &entity in &members[..5] {
            group.add_instance(entity);
        }

        assert!(group.remove_instance(members[1]));
        assert_eq!(group.tombstone_count(), 1);
        assert_eq!(group.render_count(), 5);
        assert_eq!(group.live_count() + group.tombstone_count(), group.render_count());

        assert_eq!(group.add_instance(members[5]), 1);
        assert_eq!(group.tombstone_count(), 0);
    }

    #[test]
    fn test_removing_last_slot_shrinks() {
        let members = entities(4);
        let mut group = group(InstancingConfig::default());
        for &entity in &members {
            group.add_instance(entity);
        }

        group.remove_instance(members[2]);
        group.remove_instance(members[3]);

        // slot 3 removed from the tail drags tombstone 2 with it
        assert_eq!(group.render_count(), 2);
        assert_eq!(group.tombstone_count(), 0);
        assert!(!group.remove_instance(members[3]));
    }

    #[test]
    fn test_compaction_past_tombstone_limit() {
        let members = entities(9);
        let config = InstancingConfig { tombstone_limit: 2, ..InstancingConfig::default() };
        let mut group = group(config);
        for &entity in &members[..8] {
            group.add_instance(entity);
        }

        group.remove_instance(members[0]);
        group.remove_instance(members[2]);
        assert_eq!(group.tombstone_count(), 2);
        group.remove_instance(members[4]);

        assert_eq!(group.tombstone_count(), 0);
        assert_eq!(group.render_count(), 5);
        assert_eq!(group.stats().compactions, 1);

        let mut slots: Vec<u32> = [1, 3, 5, 6, 7].iter().map(|&i| group.slot_of(members[i]).unwrap()).collect();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);

        // New members append right after the compacted live range
        assert_eq!(group.add_instance(members[8]), 5);
        assert_eq!(group.render_count(), 6);
        assert_eq!(group.tombstone_count(), 0);
    }

    #[test]
    fn test_capacity_grows_geometrically() {
        let members = entities(5);
        let config = InstancingConfig { initial_capacity: 2, growth_factor: 1.5, ..InstancingConfig::default() };
        let mut group = group(config);

        for &entity in &members {
            group.add_instance(entity);
        }
        // 2 -> 3 -> 5
        assert_eq!(group.capacity(), 5);
        assert_eq!(group.stats().growths, 2);
    }

    #[test]
    fn test_first_flush_creates_buffer_and_uploads_used_range() {
        let members = entities(3);
        let mut group = group(InstancingConfig::default());
        let mut gpu = HeadlessGpu::new();
        for &entity in &members {
            group.add_instance(entity);
        }

        let upload = group.process_updates(&mut gpu, |_| translation(2.0)).unwrap();
        assert!(upload.created);
        assert_eq!(upload.ranges, 1);
        assert_eq!(upload.bytes, 3 * InstanceTransformRaw::SIZE);
        assert!(!group.has_pending_updates());

        let handle = group.gpu_buffer().unwrap();
        let contents = gpu.buffer_contents(handle).unwrap();
        assert_eq!(contents.len(), 16 * InstanceTransformRaw::SIZE);
        assert_eq!(read_records(contents)[0].to_matrix(), translation(2.0));
    }

    #[test]
    fn test_dirty_slots_coalesce_into_ranges() {
        let members = entities(12);
        let config = InstancingConfig { upload_merge_gap: 1, ..InstancingConfig::default() };
        let mut group = group(config);
        let mut gpu = HeadlessGpu::new();
        for &entity in &members {
            group.add_instance(entity);
        }
        group.process_updates(&mut gpu, |_| Mat4::identity()).unwrap();

        for index in [0, 1, 3, 8, 11] {
            group.flag_instance_transform_update(members[index]);
        }
        let upload = group.process_updates(&mut gpu, |_| translation(1.0)).unwrap();

        // [0,4) [8,9) [11,12)
        assert!(!upload.created && !upload.resized);
        assert_eq!(upload.ranges, 3);
        assert_eq!(upload.bytes, 6 * InstanceTransformRaw::SIZE);
    }

    #[test]
    fn test_tombstones_flush_as_zero_scale() {
        let members = entities(3);
        let mut group = group(InstancingConfig::default());
        let mut gpu = HeadlessGpu::new();
        for &entity in &members {
            group.add_instance(entity);
        }
        group.process_updates(&mut gpu, |_| Mat4::identity()).unwrap();

        group.remove_instance(members[0]);
        group.process_updates(&mut gpu, |_| Mat4::identity()).unwrap();

        let contents = gpu.buffer_contents(group.gpu_buffer().unwrap()).unwrap();
        let records = read_records(contents);
        assert!(records[0].is_zero_scale());
        assert!(!records[1].is_zero_scale());
        assert_eq!(group.staged_matrix(0), Some(zero_scale_matrix()));
    }

    #[test]
    fn test_growth_resizes_existing_buffer() {
        let members = entities(3);
        let config = InstancingConfig { initial_capacity: 2, ..InstancingConfig::default() };
        let mut group = group(config);
        let mut gpu = HeadlessGpu::new();

        group.add_instance(members[0]);
        group.process_updates(&mut gpu, |_| Mat4::identity()).unwrap();
        group.add_instance(members[1]);
        group.add_instance(members[2]);

        let upload = group.process_updates(&mut gpu, |_| Mat4::identity()).unwrap();
        assert!(upload.resized);
        assert_eq!(upload.bytes, 3 * InstanceTransformRaw::SIZE);
        assert_eq!(gpu.stats().buffers_created, 1);
    }

    #[test]
    fn test_failed_allocation_keeps_updates_pending() {
        let members = entities(1);
        let mut group = group(InstancingConfig::default());
        let mut gpu = HeadlessGpu::with_budget(8);
        group.add_instance(members[0]);

        assert!(matches!(
            group.process_updates(&mut gpu, |_| Mat4::identity()),
            Err(GpuError::AllocationFailed { .. })
        ));
        assert!(group.gpu_buffer().is_none());
        assert!(group.has_pending_updates());
    }
}
