//! Transform component for the ECS system
//!
//! Holds the local pose an entity is authored with, the world-space values the
//! hierarchy system derives from it, and the intrusive links that place the
//! entity in the transform tree. Y-up right-handed; forward is -Z.
//!
//! The cached values are only refreshed by `TransformHierarchySystem`; mutate
//! transforms through `Scene` so descendants are rebuilt.

use crate::ecs::{Component, ComponentKind, Entity};
use crate::foundation::math::{basis_column, normalize_or, translation_of, Mat3, Mat4, Quat, Transform, Vec3};

bitflags::bitflags! {
    /// What changed in a transform update
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransformUpdate: u8 {
        /// Local position changed
        const POSITION = 1 << 0;
        /// Local orientation changed
        const ROTATION = 1 << 1;
        /// Local scale changed
        const SCALE = 1 << 2;
        /// Parent link changed
        const PARENT = 1 << 3;
        /// Absolute flag changed
        const ABSOLUTE = 1 << 4;
        /// Rebuilt because an ancestor changed
        const INHERITED = 1 << 5;
    }
}

impl TransformUpdate {
    /// Every local field changed
    pub const LOCAL: Self = Self::POSITION.union(Self::ROTATION).union(Self::SCALE);
}

/// Intrusive tree links, all entity handles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HierarchyLinks {
    pub(crate) parent: Option<Entity>,
    pub(crate) first_child: Option<Entity>,
    pub(crate) last_child: Option<Entity>,
    pub(crate) prev_sibling: Option<Entity>,
    pub(crate) next_sibling: Option<Entity>,
}

impl HierarchyLinks {
    /// Parent entity
    pub const fn parent(&self) -> Option<Entity> {
        self.parent
    }

    /// First child in sibling order
    pub const fn first_child(&self) -> Option<Entity> {
        self.first_child
    }

    /// Next sibling under the same parent
    pub const fn next_sibling(&self) -> Option<Entity> {
        self.next_sibling
    }
}

/// ECS Transform component
#[derive(Debug, Clone, PartialEq)]
pub struct TransformComponent {
    local: Transform,
    is_absolute: bool,

    world_matrix: Mat4,
    absolute_scale: Vec3,
    absolute_orientation: Quat,
    forward: Vec3,
    right: Vec3,
    up: Vec3,

    pub(crate) links: HierarchyLinks,
}

impl Component for TransformComponent {
    const KIND: ComponentKind = ComponentKind::Transform;
}

impl Default for TransformComponent {
    fn default() -> Self {
        Self::from_transform(Transform::identity())
    }
}

impl TransformComponent {
    /// Create identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create from a local pose. The world cache starts out equal to the
    /// local pose, which is exact for a root.
    pub fn from_transform(local: Transform) -> Self {
        let mut component = Self {
            local,
            is_absolute: false,
            world_matrix: Mat4::identity(),
            absolute_scale: local.scale,
            absolute_orientation: local.rotation,
            forward: -Vec3::z(),
            right: Vec3::x(),
            up: Vec3::y(),
            links: HierarchyLinks::default(),
        };
        component.store_world(local.to_matrix(), local.scale, local.rotation);
        component
    }

    /// Create from position only
    pub fn from_position(position: Vec3) -> Self {
        Self::from_transform(Transform::from_position(position))
    }

    /// Create from position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self::from_transform(Transform::from_position_rotation(position, rotation))
    }

    /// Builder pattern: Set position
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.set_position(position);
        self
    }

    /// Builder pattern: Set rotation from quaternion
    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.set_orientation(rotation);
        self
    }

    /// Builder pattern: Set rotation from Euler angles (radians, XYZ order)
    pub fn with_rotation_euler(self, x: f32, y: f32, z: f32) -> Self {
        self.with_rotation(Quat::from_euler_angles(x, y, z))
    }

    /// Builder pattern: Set scale (uniform)
    pub fn with_uniform_scale(self, scale: f32) -> Self {
        self.with_scale(Vec3::new(scale, scale, scale))
    }

    /// Builder pattern: Set scale (non-uniform)
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.set_scale(scale);
        self
    }

    /// Builder pattern: ignore parent influence
    pub fn with_absolute(mut self, is_absolute: bool) -> Self {
        self.is_absolute = is_absolute;
        self
    }

    /// Local position
    pub const fn position(&self) -> Vec3 {
        self.local.position
    }

    /// Local orientation
    pub const fn orientation(&self) -> Quat {
        self.local.rotation
    }

    /// Local scale
    pub const fn scale(&self) -> Vec3 {
        self.local.scale
    }

    /// Local pose
    pub const fn local(&self) -> &Transform {
        &self.local
    }

    /// Set the local position. The world cache is refreshed on the next
    /// rebuild.
    pub fn set_position(&mut self, position: Vec3) {
        self.local.position = position;
    }

    /// Set the local orientation
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.local.rotation = orientation;
    }

    /// Set the local scale
    pub fn set_scale(&mut self, scale: Vec3) {
        self.local.scale = scale;
    }

    /// Replace the whole local pose
    pub fn set_local(&mut self, local: Transform) {
        self.local = local;
    }

    /// Whether the transform ignores its parent
    pub const fn is_absolute(&self) -> bool {
        self.is_absolute
    }

    pub(crate) fn set_absolute_flag(&mut self, is_absolute: bool) {
        self.is_absolute = is_absolute;
    }

    /// Cached world matrix
    pub const fn world_matrix(&self) -> &Mat4 {
        &self.world_matrix
    }

    /// World-space position read from the cached world matrix
    pub fn world_position(&self) -> Vec3 {
        translation_of(&self.world_matrix)
    }

    /// Cached absolute scale (product of the scales up to the first
    /// absolute ancestor)
    pub const fn absolute_scale(&self) -> Vec3 {
        self.absolute_scale
    }

    /// Cached absolute orientation
    pub const fn absolute_orientation(&self) -> Quat {
        self.absolute_orientation
    }

    /// World-space forward (-Z)
    pub const fn forward(&self) -> Vec3 {
        self.forward
    }

    /// World-space right (+X)
    pub const fn right(&self) -> Vec3 {
        self.right
    }

    /// World-space up (+Y)
    pub const fn up(&self) -> Vec3 {
        self.up
    }

    /// Parent entity, if attached
    pub const fn parent(&self) -> Option<Entity> {
        self.links.parent
    }

    /// Hierarchy links
    pub const fn links(&self) -> &HierarchyLinks {
        &self.links
    }

    pub(crate) fn store_world(&mut self, world_matrix: Mat4, absolute_scale: Vec3, absolute_orientation: Quat) {
        self.world_matrix = world_matrix;
        self.absolute_scale = absolute_scale;
        self.absolute_orientation = absolute_orientation;
        self.right = normalize_or(basis_column(&world_matrix, 0), Vec3::x());
        self.up = normalize_or(basis_column(&world_matrix, 1), Vec3::y());
        self.forward = normalize_or(-basis_column(&world_matrix, 2), -Vec3::z());
    }
}

/// Transform factory for creating common transform configurations
pub struct TransformFactory;

impl TransformFactory {
    /// Transform whose -Z axis points along `direction`
    pub fn directional_light(direction: Vec3) -> TransformComponent {
        let direction = normalize_or(direction, -Vec3::z());
        let default_forward = -Vec3::z();

        let rotation = if (direction + default_forward).magnitude() < 1e-6 {
            // Opposite to the default forward; any perpendicular axis works
            Quat::from_axis_angle(&Vec3::y_axis(), std::f32::consts::PI)
        } else {
            Quat::rotation_between(&default_forward, &direction).unwrap_or_else(Quat::identity)
        };

        TransformComponent::from_position_rotation(Vec3::zeros(), rotation)
    }

    /// Transform at `position` with no orientation
    pub fn point_light(position: Vec3) -> TransformComponent {
        TransformComponent::from_position(position)
    }

    /// Camera-style transform at `position` facing `target`
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> TransformComponent {
        let forward = normalize_or(target - position, -Vec3::z());
        let right = normalize_or(forward.cross(&up), Vec3::x());
        let camera_up = right.cross(&forward);

        let basis = Mat3::from_columns(&[right, camera_up, -forward]);
        let rotation = Quat::from_matrix(&basis);

        TransformComponent::from_position_rotation(position, rotation)
    }
}
