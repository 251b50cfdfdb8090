use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;

use super::*;
use crate::assets::{AssetRegistry, LoadedMesh, Material};
use crate::ecs::components::LightFactory;
use crate::events::{EventKind, SceneFilter};
use crate::foundation::math::constants::HALF_PI;
use crate::render::HeadlessGpu;

type EventLog = Rc<RefCell<Vec<Event>>>;

fn scene() -> Scene {
    Scene::new("test", EventManager::shared(), SceneConfig::default())
}

fn record(bus: &EventManager, kinds: &[EventKind], filter: SceneFilter) -> EventLog {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    for &kind in kinds {
        let sink = Rc::clone(&log);
        bus.subscribe(kind, filter, move |event: &Event| sink.borrow_mut().push(event.clone()));
    }
    log
}

fn white() -> Vec3 {
    Vec3::new(1.0, 1.0, 1.0)
}

#[test]
fn test_reparent_then_detach_keeps_world_position() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.set_position(child, Vec3::new(1.0, 0.0, 0.0));

    assert!(scene.set_parent(child, parent));
    assert_eq!(scene.parent(child), Some(parent));
    assert_eq!(scene.children(parent), vec![child]);

    scene.set_position(parent, Vec3::new(5.0, 0.0, 0.0));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-5);

    assert!(scene.remove_parent(child));
    assert_eq!(scene.parent(child), None);
    assert!(scene.children(parent).is_empty());
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-5);
    assert_relative_eq!(scene.transform(child).unwrap().position(), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-5);

    scene.set_position(parent, Vec3::new(-5.0, 0.0, 0.0));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-5);
    assert!(!scene.remove_parent(child));
}

#[test]
fn test_child_follows_rotated_scaled_parent() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.set_scale(parent, Vec3::new(2.0, 2.0, 2.0));
    scene.set_orientation(parent, Quat::from_axis_angle(&Vec3::y_axis(), HALF_PI));
    scene.set_position(child, Vec3::new(1.0, 0.0, 0.0));
    scene.set_parent(child, parent);

    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(0.0, 0.0, -2.0), epsilon = 1e-5);
    assert_relative_eq!(scene.absolute_scale(child).unwrap(), Vec3::new(2.0, 2.0, 2.0), epsilon = 1e-5);
    assert_eq!(scene.ancestors(child), vec![parent]);
}

#[test]
fn test_set_absolute_ignores_parent() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.set_position(parent, Vec3::new(5.0, 0.0, 0.0));
    scene.set_position(child, Vec3::new(1.0, 0.0, 0.0));
    scene.set_parent(child, parent);

    assert!(scene.set_absolute(child, true));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(1.0, 0.0, 0.0), epsilon = 1e-5);

    // Moving the parent no longer moves the child
    scene.set_position(parent, Vec3::new(9.0, 0.0, 0.0));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(1.0, 0.0, 0.0), epsilon = 1e-5);

    assert!(scene.set_absolute(child, false));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(10.0, 0.0, 0.0), epsilon = 1e-5);
}

#[test]
fn test_transform_events_follow_hierarchy_order() {
    let mut scene = scene();
    let log = record(scene.bus(), &[EventKind::TransformUpdated], SceneFilter::Scene(scene.id()));

    let root = scene.create_entity("root");
    let middle = scene.create_entity("middle");
    let leaf = scene.create_entity("leaf");
    scene.set_parent(middle, root);
    scene.set_parent(leaf, middle);
    log.borrow_mut().clear();

    scene.set_position(root, Vec3::new(0.0, 1.0, 0.0));

    let events = log.borrow();
    let order: Vec<Entity> = events.iter().filter_map(Event::entity).collect();
    assert_eq!(order, vec![root, middle, leaf]);
    for event in events.iter().skip(1) {
        match event {
            Event::TransformUpdated { update, .. } => {
                assert!(update.contains(TransformUpdate::POSITION | TransformUpdate::INHERITED));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_relative_eq!(scene.absolute_position(leaf).unwrap(), Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-5);
}

#[test]
fn test_modify_component_rebuilds_transform() {
    let mut scene = scene();
    let entity = scene.create_entity("moved");

    let previous = scene.modify_component::<TransformComponent, _>(entity, |t| {
        let previous = t.position();
        t.set_position(Vec3::new(0.0, 0.0, 4.0));
        previous
    });

    assert_eq!(previous, Some(Vec3::zeros()));
    assert_relative_eq!(scene.absolute_position(entity).unwrap(), Vec3::new(0.0, 0.0, 4.0), epsilon = 1e-5);
}

#[test]
fn test_scene_filter_isolates_scenes() {
    let bus = EventManager::shared();
    let mut first = Scene::new("first", Rc::clone(&bus), SceneConfig::default());
    let mut second = Scene::new("second", Rc::clone(&bus), SceneConfig::default());
    assert_ne!(first.id(), second.id());

    let first_only = record(&bus, &[EventKind::EntityCreated], SceneFilter::Scene(first.id()));
    let everyone = record(&bus, &[EventKind::EntityCreated], SceneFilter::Any);
    let resizes = record(&bus, &[EventKind::WindowResized], SceneFilter::Scene(second.id()));

    first.create_entity("a");
    second.create_entity("b");
    bus.publish(Event::WindowResized { width: 800, height: 600 });

    assert_eq!(first_only.borrow().len(), 1);
    assert_eq!(first_only.borrow()[0].scene(), Some(first.id()));
    assert_eq!(everyone.borrow().len(), 2);
    assert_eq!(resizes.borrow().len(), 1);
}

#[test]
fn test_material_change_moves_entity_between_groups() {
    let mut assets = AssetRegistry::new();
    let cube = assets.insert_mesh("cube", 1).unwrap();
    let red = assets.insert_material(Material::new("red", [1.0, 0.0, 0.0, 1.0]));

    let mut scene = scene();
    let a = scene.create_entity("a");
    let b = scene.create_entity("b");
    scene.add_component(a, MeshComponent::with_material(cube, MaterialId::DEFAULT));
    scene.add_component(b, MeshComponent::with_material(cube, MaterialId::DEFAULT));
    assert_eq!(scene.instancing().group_count(), 1);
    assert_eq!(scene.instancing().group_of(a).unwrap().render_count(), 2);

    assert!(scene.set_material(b, 0, red));

    assert_eq!(scene.instancing().group_count(), 2);
    assert_eq!(scene.instancing().group_of(b).unwrap().material_ids(), &[red]);
    assert_eq!(scene.instancing().group_of(a).unwrap().render_count(), 1);
    assert_eq!(scene.instancing().stats().resorts, 1);

    assert!(!scene.set_material(b, 3, red));
}

#[test]
fn test_hidden_mesh_leaves_its_group() {
    let mut assets = AssetRegistry::new();
    let cube = assets.insert_mesh("cube", 1).unwrap();

    let mut scene = scene();
    let entity = scene.create_entity("blinking");
    scene.add_component(entity, MeshComponent::with_material(cube, MaterialId::DEFAULT));

    scene.set_mesh_visible(entity, false);
    assert!(scene.instancing().group_of(entity).is_none());
    assert_eq!(scene.instancing().group_count(), 0);

    scene.set_mesh_visible(entity, true);
    assert!(scene.instancing().group_of(entity).is_some());
}

#[test]
fn test_destroy_entity_detaches_children() {
    let mut assets = AssetRegistry::new();
    let cube = assets.insert_mesh("cube", 1).unwrap();

    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.add_component(parent, MeshComponent::with_material(cube, MaterialId::DEFAULT));
    scene.set_position(parent, Vec3::new(0.0, 3.0, 0.0));
    scene.set_position(child, Vec3::new(1.0, 0.0, 0.0));
    scene.set_parent(child, parent);

    assert!(scene.destroy_entity(parent));

    assert!(!scene.is_alive(parent));
    assert!(scene.is_alive(child));
    assert_eq!(scene.parent(child), None);
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(1.0, 3.0, 0.0), epsilon = 1e-5);
    assert_eq!(scene.instancing().group_count(), 0);
    assert_eq!(scene.world().entity_count(), 1);
}

#[test]
fn test_component_deleted_precedes_entity_destroyed() {
    let mut scene = scene();
    let log = record(
        scene.bus(),
        &[EventKind::ComponentDeleted, EventKind::EntityDestroyed],
        SceneFilter::Any,
    );

    let entity = scene.create_entity("lamp");
    scene.add_component(entity, MeshComponent::default());
    scene.add_component(entity, LightFactory::point(white(), 1.0, 5.0));
    scene.destroy_entity(entity);

    let kinds: Vec<_> = log
        .borrow()
        .iter()
        .map(|event| match event {
            Event::ComponentDeleted { component, .. } => Some(*component),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(ComponentKind::Mesh),
            Some(ComponentKind::Light),
            Some(ComponentKind::Transform),
            None,
        ]
    );
}

#[test]
fn test_duplicate_add_emits_no_event() {
    let mut scene = scene();
    let log = record(scene.bus(), &[EventKind::ComponentAdded], SceneFilter::Any);
    let entity = scene.create_entity("lamp");

    scene.add_component(entity, LightFactory::point(white(), 1.0, 5.0));
    let existing = scene
        .add_component(entity, LightFactory::point(white(), 9.0, 5.0))
        .map(|light| light.intensity);

    assert_eq!(existing, Some(1.0));
    let light_events = log
        .borrow()
        .iter()
        .filter(|event| matches!(event, Event::ComponentAdded { component: ComponentKind::Light, .. }))
        .count();
    assert_eq!(light_events, 1);
}

#[test]
fn test_stale_handle_is_rejected() {
    let mut scene = scene();
    let entity = scene.create_entity("short-lived");
    scene.destroy_entity(entity);
    let replacement = scene.create_entity("replacement");

    assert_ne!(entity, replacement);
    assert!(!scene.is_alive(entity));
    assert!(!scene.destroy_entity(entity));
    assert!(!scene.set_position(entity, Vec3::x()));
    assert!(scene.add_component(entity, MeshComponent::default()).is_none());
    assert!(scene.get_component::<TransformComponent>(entity).is_none());
    assert!(scene.is_alive(replacement));
}

#[test]
fn test_default_transform_can_be_disabled() {
    let config = SceneConfig {
        create_default_transform: false,
        ..SceneConfig::default()
    };
    let mut scene = Scene::new("bare", EventManager::shared(), config);
    let entity = scene.create_entity("bare");

    assert!(!scene.has_component::<TransformComponent>(entity));
    assert!(!scene.set_position(entity, Vec3::x()));

    scene.add_component(entity, TransformComponent::from_position(Vec3::new(2.0, 0.0, 0.0)));
    assert_relative_eq!(scene.absolute_position(entity).unwrap(), Vec3::new(2.0, 0.0, 0.0), epsilon = 1e-5);
}

#[test]
fn test_uuid_lookup() {
    let mut scene = scene();
    let entity = scene.create_entity_with_uuid("saved", Uuid(42));
    assert_eq!(scene.find_by_uuid(Uuid(42)), Some(entity));
    assert_eq!(scene.world().name(entity), Some("saved"));
}

#[test]
fn test_assign_mesh_fits_materials() {
    let mut assets = AssetRegistry::new();
    let ship = assets.insert_mesh("ship", 3).unwrap();

    let mut scene = scene();
    let entity = scene.create_entity("ship");
    assert!(scene.assign_mesh(entity, ship, &assets).unwrap());

    let mesh = scene.get_component::<MeshComponent>(entity).unwrap();
    assert_eq!(mesh.mesh, Some(ship));
    assert_eq!(mesh.materials, vec![MaterialId::DEFAULT; 3]);
    assert!(scene.instancing().group_of(entity).is_some());

    let missing = scene.assign_mesh(entity, MeshId(999), &assets);
    assert!(matches!(missing, Err(AssetError::UnknownMesh(MeshId(999)))));
}

#[test]
fn test_deferred_destroy_applies_at_end_frame() {
    let mut scene = scene();
    let mut gpu = HeadlessGpu::new();
    let lamps: Vec<Entity> = (0..3)
        .map(|i| {
            let entity = scene.create_entity(format!("lamp{i}"));
            scene.add_component(entity, LightFactory::point(white(), i as f32, 5.0));
            entity
        })
        .collect();

    let dim: Vec<Entity> = scene
        .view::<LightComponent>()
        .filter(|(_, light)| light.intensity < 1.5)
        .map(|(entity, _)| entity)
        .collect();
    for entity in dim {
        scene.defer_destroy(entity);
    }

    assert_eq!(scene.pending_commands(), 2);
    assert!(scene.is_alive(lamps[0]));

    let stats = scene.end_frame(&mut gpu).unwrap();
    assert_eq!(stats.commands_applied, 2);
    assert_eq!(stats.entity_count, 1);
    assert!(!scene.is_alive(lamps[0]));
    assert!(!scene.is_alive(lamps[1]));
    assert!(scene.is_alive(lamps[2]));
}

#[test]
fn test_commands_deferred_while_applying_wait_a_frame() {
    let mut scene = scene();
    let mut gpu = HeadlessGpu::new();
    let entity = scene.create_entity("late");

    scene.defer_fn(move |scene| scene.defer_destroy(entity));

    scene.end_frame(&mut gpu).unwrap();
    assert!(scene.is_alive(entity));
    assert_eq!(scene.pending_commands(), 1);

    scene.end_frame(&mut gpu).unwrap();
    assert!(!scene.is_alive(entity));
}

#[test]
fn test_deferred_component_removal_and_reparent() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.add_component(child, LightFactory::directional(white(), 1.0));

    scene.defer_remove_component::<LightComponent>(child);
    scene.defer_set_parent(child, Some(parent));
    assert_eq!(scene.apply_commands(), 2);

    assert!(!scene.has_component::<LightComponent>(child));
    assert_eq!(scene.parent(child), Some(parent));

    scene.defer_set_parent(child, None);
    scene.apply_commands();
    assert_eq!(scene.parent(child), None);
}

#[test]
fn test_loaded_meshes_skip_dead_entities() {
    let mut scene = scene();
    let queue = AssetLoadQueue::new();
    let sender = queue.sender();

    let alive = scene.create_entity("alive");
    let dead = scene.create_entity("dead");
    let bare = scene.create_entity("bare");
    scene.add_component(alive, MeshComponent::default());
    scene.add_component(dead, MeshComponent::default());
    scene.destroy_entity(dead);

    for entity in [alive, dead, bare] {
        sender
            .send(LoadedMesh { entity, mesh: MeshId(7), materials: vec![MaterialId::DEFAULT] })
            .unwrap();
    }

    assert_eq!(scene.apply_loaded_meshes(&queue), 1);
    assert_eq!(scene.get_component::<MeshComponent>(alive).unwrap().mesh, Some(MeshId(7)));
    assert!(scene.instancing().group_of(alive).is_some());
    assert!(!scene.has_component::<MeshComponent>(bare));
}

#[test]
fn test_lights_follow_their_parent() {
    let mut scene = scene();
    let ship = scene.create_entity("ship");
    let lamp = scene.create_entity("lamp");
    let off = scene.create_entity("off");
    scene.add_component(lamp, LightFactory::point(white(), 2.0, 10.0));
    scene.add_component(off, LightFactory::point(white(), 2.0, 10.0));
    scene.modify_component::<LightComponent, _>(off, |light| light.enabled = false);
    scene.set_position(lamp, Vec3::new(0.0, 2.0, 0.0));
    scene.set_parent(lamp, ship);

    scene.set_position(ship, Vec3::new(3.0, 0.0, 0.0));

    let lights = scene.collect_lights();
    assert_eq!(lights.len(), 1);
    assert_relative_eq!(lights[0].position, Vec3::new(3.0, 2.0, 0.0), epsilon = 1e-5);
    assert_relative_eq!(lights[0].direction, -Vec3::z(), epsilon = 1e-5);
}

#[test]
fn test_end_frame_uploads_world_matrices_and_tombstones() {
    let mut assets = AssetRegistry::new();
    let rock = assets.insert_mesh("rock", 1).unwrap();
    let mut scene = scene();
    let mut gpu = HeadlessGpu::new();

    let rocks: Vec<Entity> = (0..3)
        .map(|i| {
            let entity = scene.create_entity(format!("rock{i}"));
            scene.set_position(entity, Vec3::new(i as f32, 0.0, 0.0));
            scene.add_component(entity, MeshComponent::with_material(rock, MaterialId::DEFAULT));
            entity
        })
        .collect();

    let stats = scene.end_frame(&mut gpu).unwrap();
    assert_eq!(stats.upload.buffers_created, 1);
    assert_eq!(stats.group_count, 1);

    let group = scene.instancing().group_of(rocks[1]).unwrap();
    let slot = group.slot_of(rocks[1]).unwrap();
    let staged = group.staged_matrix(slot).unwrap();
    assert_relative_eq!(staged[(0, 3)], 1.0);
    assert!(!group.has_pending_updates());

    scene.remove_component::<MeshComponent>(rocks[1]);
    scene.end_frame(&mut gpu).unwrap();

    let group = scene.instancing().group_of(rocks[0]).unwrap();
    assert_eq!(group.tombstone_count(), 1);
    assert_eq!(group.render_count(), 3);
    let tombstone = group.staged_matrix(slot).unwrap();
    assert!(tombstone.fixed_view::<3, 3>(0, 0).iter().all(|v| *v == 0.0));

    let draws = scene.draw_list(&assets);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].mesh_name, "rock");
    assert_eq!(draws[0].instance_count, 3);

    scene.set_position(rocks[2], Vec3::new(0.0, 5.0, 0.0));
    assert!(scene.instancing().group_of(rocks[2]).unwrap().has_pending_updates());
}

#[test]
fn test_replacing_transform_keeps_hierarchy_place() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.set_parent(child, parent);

    scene.modify_component::<TransformComponent, _>(child, |t| {
        *t = TransformComponent::from_position(Vec3::new(2.0, 0.0, 0.0));
    });

    assert_eq!(scene.parent(child), Some(parent));
    assert_eq!(scene.children(parent), vec![child]);

    scene.set_position(parent, Vec3::new(5.0, 0.0, 0.0));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(7.0, 0.0, 0.0), epsilon = 1e-5);
    assert_eq!(scene.hierarchy().stats().corruptions, 0);
}

#[test]
fn test_copying_sibling_transform_keeps_own_links() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let a = scene.create_entity("a");
    let b = scene.create_entity("b");
    scene.set_position(a, Vec3::new(1.0, 0.0, 0.0));
    scene.set_position(b, Vec3::new(0.0, 1.0, 0.0));
    scene.set_parent(a, parent);
    scene.set_parent(b, parent);

    let copy = scene.transform(a).unwrap().clone();
    scene.modify_component::<TransformComponent, _>(b, |t| *t = copy);

    assert_eq!(scene.children(parent), vec![a, b]);
    assert_eq!(scene.parent(b), Some(parent));
    assert_eq!(scene.transform(a).unwrap().links().next_sibling(), Some(b));
    assert_eq!(scene.transform(b).unwrap().links().next_sibling(), None);

    scene.set_position(parent, Vec3::new(5.0, 0.0, 0.0));
    assert_relative_eq!(scene.absolute_position(b).unwrap(), Vec3::new(6.0, 0.0, 0.0), epsilon = 1e-5);
    assert_eq!(scene.hierarchy().stats().corruptions, 0);
}

#[test]
fn test_absolute_flag_changed_through_modify() {
    let mut scene = scene();
    let parent = scene.create_entity("parent");
    let child = scene.create_entity("child");
    scene.set_position(parent, Vec3::new(5.0, 0.0, 0.0));
    scene.set_position(child, Vec3::new(1.0, 0.0, 0.0));
    scene.set_parent(child, parent);

    scene.modify_component::<TransformComponent, _>(child, |t| *t = t.clone().with_absolute(true));

    assert!(scene.transform(child).unwrap().is_absolute());
    assert_eq!(scene.parent(child), Some(parent));
    assert_relative_eq!(scene.absolute_position(child).unwrap(), Vec3::new(1.0, 0.0, 0.0), epsilon = 1e-5);
}

#[test]
fn test_mesh_without_transform_uploads_identity() {
    let mut assets = AssetRegistry::new();
    let rock = assets.insert_mesh("rock", 1).unwrap();
    let mut scene = scene();
    let mut gpu = HeadlessGpu::new();

    let entity = scene.create_entity("rock");
    scene.set_position(entity, Vec3::new(3.0, 0.0, 0.0));
    scene.add_component(entity, MeshComponent::with_material(rock, MaterialId::DEFAULT));
    scene.end_frame(&mut gpu).unwrap();

    scene.remove_component::<TransformComponent>(entity);
    assert!(scene.instancing().group_of(entity).unwrap().has_pending_updates());
    scene.end_frame(&mut gpu).unwrap();

    let group = scene.instancing().group_of(entity).unwrap();
    let slot = group.slot_of(entity).unwrap();
    assert_eq!(group.staged_matrix(slot), Some(Mat4::identity()));
}
