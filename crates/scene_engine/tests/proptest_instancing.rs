//! Property tests for instance group slot management.
//!
//! Random add/remove sequences must keep every member on a unique slot inside
//! the used range, account for every slot as either live or tombstone, and
//! after a flush leave tombstones at zero scale while members carry their own
//! matrix.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use scene_engine::config::InstancingConfig;
use scene_engine::prelude::*;
use scene_engine::render::{InstanceGroup, InstanceKey, InstanceTransformRaw};

const POOL: usize = 24;

#[derive(Debug, Clone)]
enum GroupOp {
    Add(usize),
    Remove(usize),
    Touch(usize),
    Flush,
}

fn group_op_strategy() -> impl Strategy<Value = GroupOp> {
    prop_oneof![
        4 => (0..POOL).prop_map(GroupOp::Add),
        3 => (0..POOL).prop_map(GroupOp::Remove),
        1 => (0..POOL).prop_map(GroupOp::Touch),
        1 => Just(GroupOp::Flush),
    ]
}

fn config_strategy() -> impl Strategy<Value = InstancingConfig> {
    (1u32..6, 1u32..5, 0u32..4).prop_map(|(initial_capacity, tombstone_limit, upload_merge_gap)| InstancingConfig {
        initial_capacity,
        growth_factor: 1.5,
        tombstone_limit,
        upload_merge_gap,
    })
}

fn check_slots(group: &InstanceGroup, members: &HashSet<Entity>) -> Result<(), TestCaseError> {
    prop_assert_eq!(group.live_count() as usize, members.len());
    prop_assert_eq!(group.render_count(), group.live_count() + group.tombstone_count());
    prop_assert!(group.render_count() <= group.capacity());

    let mut seen = HashSet::new();
    for &entity in members {
        let slot = group.slot_of(entity);
        prop_assert!(slot.is_some(), "{entity:?} lost its slot");
        let slot = slot.unwrap();
        prop_assert!(slot < group.render_count());
        prop_assert!(seen.insert(slot), "slot {slot} assigned twice");
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn instance_slots_stay_unique_and_accounted(
        config in config_strategy(),
        ops in prop::collection::vec(group_op_strategy(), 1..120)
    ) {
        let mut world = World::new();
        let pool: Vec<Entity> = (0..POOL).map(|i| world.create_entity(format!("e{i}"), None)).collect();
        let matrices: HashMap<Entity, Mat4> = pool
            .iter()
            .enumerate()
            .map(|(i, &entity)| (entity, Mat4::new_translation(&Vec3::new(i as f32 + 1.0, 0.0, 0.0))))
            .collect();

        let mut group = InstanceGroup::new(
            InstanceKey { mesh: MeshId(1), materials: vec![MaterialId::DEFAULT] },
            config,
        );
        let mut gpu = HeadlessGpu::new();
        let mut members = HashSet::new();

        for op in ops {
            match op {
                GroupOp::Add(i) => {
                    if members.insert(pool[i]) {
                        group.add_instance(pool[i]);
                    }
                }
                GroupOp::Remove(i) => {
                    if members.remove(&pool[i]) {
                        prop_assert!(group.remove_instance(pool[i]));
                    }
                }
                GroupOp::Touch(i) => {
                    prop_assert_eq!(group.flag_instance_transform_update(pool[i]), members.contains(&pool[i]));
                }
                GroupOp::Flush => {
                    group.process_updates(&mut gpu, |entity| matrices[&entity]).unwrap();
                    prop_assert!(!group.has_pending_updates());
                }
            }
            check_slots(&group, &members)?;
        }

        group.process_updates(&mut gpu, |entity| matrices[&entity]).unwrap();
        let occupied: HashMap<u32, Entity> = group.members().collect();
        for slot in 0..group.render_count() {
            let staged = group.staged_matrix(slot).unwrap();
            match occupied.get(&slot) {
                Some(entity) => prop_assert_eq!(staged, matrices[entity]),
                None => prop_assert!(InstanceTransformRaw::from_matrix(&staged).is_zero_scale()),
            }
        }
    }
}
