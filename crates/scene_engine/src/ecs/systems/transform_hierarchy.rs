//! Transform hierarchy system
//!
//! Maintains the intrusive parent/child links stored in every
//! [`TransformComponent`] and keeps cached world matrices consistent with
//! them. A change to one transform rebuilds that transform, then walks its
//! subtree depth-first in pre-order (first child, its children, next sibling)
//! so every parent is current before its children read it. Children flagged
//! absolute stop the walk for their whole subtree.
//!
//! Every rebuilt transform produces one `TransformUpdated` event, appended to
//! the caller's buffer in rebuild order.

use crate::ecs::components::transform::{HierarchyLinks, TransformComponent, TransformUpdate};
use crate::ecs::{Entity, World};
use crate::events::{Event, SceneId};
use crate::foundation::math::{compose_affine, inverse_scale, translation_of, Mat3, Mat4, Quat, Transform, Vec3};

/// Counters kept by the hierarchy system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyStats {
    /// Transforms rebuilt
    pub rebuilt: usize,
    /// `set_parent` calls refused (cycle, self-parenting, missing transform)
    pub rejected_reparents: usize,
    /// Malformed links encountered during walks
    pub corruptions: usize,
}

/// Propagates transform changes down the hierarchy
#[derive(Debug, Default)]
pub struct TransformHierarchySystem {
    stats: HierarchyStats,
}

impl TransformHierarchySystem {
    /// Create the system
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation
    pub const fn stats(&self) -> &HierarchyStats {
        &self.stats
    }

    /// Rebuild `entity` and every non-absolute descendant.
    ///
    /// Returns the number of transforms rebuilt; one event per rebuild is
    /// appended to `out`.
    pub fn on_transform_updated(
        &mut self,
        world: &mut World,
        scene: SceneId,
        entity: Entity,
        update: TransformUpdate,
        out: &mut Vec<Event>,
    ) -> usize {
        if !self.rebuild_matrix(world, entity) {
            return 0;
        }
        out.push(Event::TransformUpdated { scene, entity, update });

        let limit = world.component_count::<TransformComponent>();
        let inherited = update | TransformUpdate::INHERITED;
        let mut rebuilt = 1;
        let mut visited = 1;
        let mut stack = Vec::new();
        self.push_children(world, entity, &mut stack);

        while let Some(node) = stack.pop() {
            visited += 1;
            if visited > limit {
                self.report_corruption(format!("walk from {entity:?} visited more than {limit} transforms"));
                break;
            }

            let absolute = world
                .get_component::<TransformComponent>(node)
                .map_or(true, TransformComponent::is_absolute);
            if absolute {
                continue;
            }

            if self.rebuild_matrix(world, node) {
                out.push(Event::TransformUpdated { scene, entity: node, update: inherited });
                rebuilt += 1;
                self.push_children(world, node, &mut stack);
            }
        }

        log::trace!("Transform update on {entity:?} rebuilt {rebuilt} transforms");
        rebuilt
    }

    /// Recompute one cached world matrix from its local pose and its
    /// parent's cache. Descendants are not touched.
    pub fn rebuild_matrix(&mut self, world: &mut World, entity: Entity) -> bool {
        let Some(transform) = world.get_component::<TransformComponent>(entity) else {
            return false;
        };
        let local = *transform.local();
        let parent = if transform.is_absolute() { None } else { transform.parent() };

        let parent_state = match parent {
            Some(parent) => match world.get_component::<TransformComponent>(parent) {
                Some(parent) => Some((*parent.world_matrix(), parent.absolute_scale(), parent.absolute_orientation())),
                None => {
                    self.report_corruption(format!("{entity:?} points at parent {parent:?} without a transform"));
                    None
                }
            },
            None => None,
        };

        let (world_matrix, absolute_scale, absolute_orientation) = match parent_state {
            Some((parent_world, parent_scale, parent_orientation)) => {
                compose_attached(&local, &parent_world, &parent_scale, &parent_orientation)
            }
            None => (local.to_matrix(), local.scale, local.rotation),
        };

        if let Some(transform) = world.get_component_mut::<TransformComponent>(entity) {
            transform.store_world(world_matrix, absolute_scale, absolute_orientation);
        }
        self.stats.rebuilt += 1;
        true
    }

    /// Attach `child` under `parent`.
    ///
    /// Refuses self-parenting, cycles and entities without transforms. The
    /// child keeps its local pose, so its world pose changes.
    pub fn set_parent(
        &mut self,
        world: &mut World,
        scene: SceneId,
        child: Entity,
        parent: Entity,
        out: &mut Vec<Event>,
    ) -> bool {
        if child == parent {
            log::warn!("Refusing to parent {child:?} to itself");
            self.stats.rejected_reparents += 1;
            return false;
        }
        let Some(current) = world.get_component::<TransformComponent>(child).map(TransformComponent::parent) else {
            log::warn!("set_parent: {child:?} has no transform");
            self.stats.rejected_reparents += 1;
            return false;
        };
        if !world.has_component::<TransformComponent>(parent) {
            log::warn!("set_parent: parent {parent:?} has no transform");
            self.stats.rejected_reparents += 1;
            return false;
        }
        if current == Some(parent) {
            return true;
        }
        if Self::is_ancestor(world, child, parent) {
            log::warn!("Refusing to parent {child:?} to its descendant {parent:?}");
            self.stats.rejected_reparents += 1;
            return false;
        }

        Self::detach(world, child);
        Self::attach(world, child, parent);
        self.on_transform_updated(world, scene, child, TransformUpdate::PARENT, out);
        true
    }

    /// Detach `child` from its parent without moving it: the current
    /// absolute pose becomes the local pose.
    pub fn remove_parent(&mut self, world: &mut World, scene: SceneId, child: Entity, out: &mut Vec<Event>) -> bool {
        let Some(transform) = world.get_component_mut::<TransformComponent>(child) else {
            return false;
        };
        if transform.parent().is_none() {
            return false;
        }

        let baked = Transform::new(
            translation_of(transform.world_matrix()),
            transform.absolute_orientation(),
            transform.absolute_scale(),
        );
        transform.set_local(baked);

        Self::detach(world, child);
        self.on_transform_updated(world, scene, child, TransformUpdate::PARENT, out);
        true
    }

    /// Toggle whether `entity` ignores its parent
    pub fn set_absolute(
        &mut self,
        world: &mut World,
        scene: SceneId,
        entity: Entity,
        is_absolute: bool,
        out: &mut Vec<Event>,
    ) -> bool {
        let Some(transform) = world.get_component_mut::<TransformComponent>(entity) else {
            return false;
        };
        transform.set_absolute_flag(is_absolute);
        self.on_transform_updated(world, scene, entity, TransformUpdate::ABSOLUTE, out);
        true
    }

    /// Cut every link of `entity` before its transform goes away: children
    /// become roots at their current absolute pose, and the entity leaves its
    /// parent's child list.
    pub fn unlink(&mut self, world: &mut World, scene: SceneId, entity: Entity, out: &mut Vec<Event>) {
        for child in Self::children(world, entity) {
            self.remove_parent(world, scene, child, out);
        }
        Self::detach(world, entity);
    }

    /// Direct children in sibling order
    pub fn children(world: &World, entity: Entity) -> Vec<Entity> {
        let limit = world.component_count::<TransformComponent>();
        let mut children = Vec::new();
        let mut next = world
            .get_component::<TransformComponent>(entity)
            .and_then(|transform| transform.links.first_child);

        while let Some(child) = next {
            if children.len() >= limit {
                break;
            }
            children.push(child);
            next = world
                .get_component::<TransformComponent>(child)
                .and_then(|transform| transform.links.next_sibling);
        }
        children
    }

    /// Parent of `entity`
    pub fn parent(world: &World, entity: Entity) -> Option<Entity> {
        world.get_component::<TransformComponent>(entity)?.parent()
    }

    /// Parent chain, nearest first
    pub fn ancestors(world: &World, entity: Entity) -> Vec<Entity> {
        let limit = world.component_count::<TransformComponent>();
        let mut ancestors = Vec::new();
        let mut current = Self::parent(world, entity);
        while let Some(ancestor) = current {
            if ancestors.len() >= limit {
                break;
            }
            ancestors.push(ancestor);
            current = Self::parent(world, ancestor);
        }
        ancestors
    }

    /// Whether `ancestor` appears on the parent chain of `entity`
    pub fn is_ancestor(world: &World, ancestor: Entity, entity: Entity) -> bool {
        Self::ancestors(world, entity).contains(&ancestor)
    }

    /// Product of scales from `entity` up to the first absolute ancestor
    pub fn absolute_scale(world: &World, entity: Entity) -> Option<Vec3> {
        let mut scale = Vec3::new(1.0, 1.0, 1.0);
        Self::walk_to_root(world, entity, |transform| scale.component_mul_assign(&transform.scale()))?;
        Some(scale)
    }

    /// Composition of orientations from the first absolute ancestor down to
    /// `entity`
    pub fn absolute_orientation(world: &World, entity: Entity) -> Option<Quat> {
        let mut orientation = Quat::identity();
        Self::walk_to_root(world, entity, |transform| orientation = transform.orientation() * orientation)?;
        Some(orientation)
    }

    /// Visit `entity` and its ancestors, stopping after the first absolute
    /// transform or the root
    fn walk_to_root<F>(world: &World, entity: Entity, mut visit: F) -> Option<()>
    where
        F: FnMut(&TransformComponent),
    {
        let limit = world.component_count::<TransformComponent>();
        let mut current = world.get_component::<TransformComponent>(entity)?;
        for _ in 0..limit {
            visit(current);
            if current.is_absolute() {
                break;
            }
            match current.parent().and_then(|parent| world.get_component::<TransformComponent>(parent)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(())
    }

    fn push_children(&mut self, world: &World, parent: Entity, stack: &mut Vec<Entity>) {
        let children = Self::children(world, parent);
        for &child in children.iter().rev() {
            let linked = world
                .get_component::<TransformComponent>(child)
                .is_some_and(|transform| transform.parent() == Some(parent));
            if linked {
                stack.push(child);
            } else {
                self.report_corruption(format!("{child:?} is listed under {parent:?} but does not point back"));
            }
        }
    }

    fn report_corruption(&mut self, message: String) {
        self.stats.corruptions += 1;
        log::error!("Transform hierarchy corrupted: {message}");
        debug_assert!(false, "transform hierarchy corrupted: {message}");
    }

    fn links_mut(world: &mut World, entity: Entity) -> Option<&mut HierarchyLinks> {
        world
            .get_component_mut::<TransformComponent>(entity)
            .map(|transform| &mut transform.links)
    }

    /// Remove `child` from its parent's sibling list
    fn detach(world: &mut World, child: Entity) {
        let Some(links) = Self::links_mut(world, child) else {
            return;
        };
        let HierarchyLinks { parent, prev_sibling, next_sibling, .. } = *links;
        links.parent = None;
        links.prev_sibling = None;
        links.next_sibling = None;

        let Some(parent) = parent else {
            return;
        };
        match prev_sibling {
            Some(prev) => {
                if let Some(prev) = Self::links_mut(world, prev) {
                    prev.next_sibling = next_sibling;
                }
            }
            None => {
                if let Some(parent) = Self::links_mut(world, parent) {
                    parent.first_child = next_sibling;
                }
            }
        }
        match next_sibling {
            Some(next) => {
                if let Some(next) = Self::links_mut(world, next) {
                    next.prev_sibling = prev_sibling;
                }
            }
            None => {
                if let Some(parent) = Self::links_mut(world, parent) {
                    parent.last_child = prev_sibling;
                }
            }
        }
    }

    /// Append a detached `child` to the end of `parent`'s child list
    fn attach(world: &mut World, child: Entity, parent: Entity) {
        let Some(parent_links) = Self::links_mut(world, parent) else {
            return;
        };
        let previous_last = parent_links.last_child;
        parent_links.last_child = Some(child);
        if previous_last.is_none() {
            parent_links.first_child = Some(child);
        }

        if let Some(last) = previous_last {
            if let Some(last) = Self::links_mut(world, last) {
                last.next_sibling = Some(child);
            }
        }
        if let Some(links) = Self::links_mut(world, child) {
            links.parent = Some(parent);
            links.prev_sibling = previous_last;
            links.next_sibling = None;
        }
    }
}

/// World matrix of a transform under a parent.
///
/// The parent's absolute scale is divided back out of the basis before the
/// parent matrix is applied, so the result is R_abs * S_abs with
/// S_abs = local scale * parent absolute scale and never picks up shear from
/// a rotated, non-uniformly scaled parent. The local position is still
/// expressed in the parent's scaled space.
fn compose_attached(
    local: &Transform,
    parent_world: &Mat4,
    parent_scale: &Vec3,
    parent_orientation: &Quat,
) -> (Mat4, Vec3, Quat) {
    let total_scale = local.scale.component_mul(parent_scale);
    let basis = Mat3::from_diagonal(&inverse_scale(parent_scale))
        * local.rotation.to_rotation_matrix().into_inner()
        * Mat3::from_diagonal(&total_scale);
    let local_matrix = compose_affine(&basis, &local.position);

    (parent_world * local_matrix, total_scale, parent_orientation * local.rotation)
}
