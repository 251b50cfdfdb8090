//! Math utilities and types
//!
//! Provides the nalgebra aliases used across the scene core plus the few
//! matrix helpers the transform hierarchy and instancing layers share.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};
use serde::{Deserialize, Serialize};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Scale components smaller than this are treated as collapsed.
pub const SCALE_EPSILON: f32 = 1e-8;

/// Local pose: position, rotation and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Create a transform from all three parts
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self { position, rotation, scale }
    }

    /// Convert to a transformation matrix (translation * rotation * scale).
    ///
    /// The translation column is written after the rotation/scale block is
    /// composed, so it is exact regardless of the scale.
    pub fn to_matrix(&self) -> Mat4 {
        let basis = self.rotation.to_rotation_matrix().into_inner() * Mat3::from_diagonal(&self.scale);
        compose_affine(&basis, &self.position)
    }

    /// Apply this transform to a point
    pub fn transform_point(&self, point: Point3) -> Point3 {
        self.to_matrix().transform_point(&point)
    }
}

/// Build an affine 4x4 matrix from a 3x3 basis and a translation.
pub fn compose_affine(basis: &Mat3, translation: &Vec3) -> Mat4 {
    let mut matrix = basis.to_homogeneous();
    matrix.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    matrix
}

/// Translation column of an affine matrix.
pub fn translation_of(matrix: &Mat4) -> Vec3 {
    Vec3::new(matrix.m14, matrix.m24, matrix.m34)
}

/// Column `index` (0..3) of the upper 3x3 block of an affine matrix.
pub fn basis_column(matrix: &Mat4, index: usize) -> Vec3 {
    Vec3::new(matrix[(0, index)], matrix[(1, index)], matrix[(2, index)])
}

/// Matrix that collapses every vertex onto the origin.
///
/// Used for instance slots that must still be submitted but draw nothing.
pub fn zero_scale_matrix() -> Mat4 {
    let mut matrix = Mat4::zeros();
    matrix.m44 = 1.0;
    matrix
}

/// Component-wise reciprocal of a scale vector.
///
/// Collapsed components (and a collapsed determinant) map to zero instead of
/// infinity.
pub fn inverse_scale(scale: &Vec3) -> Vec3 {
    let determinant = scale.x * scale.y * scale.z;
    if determinant.abs() > SCALE_EPSILON {
        return Vec3::new(1.0 / scale.x, 1.0 / scale.y, 1.0 / scale.z);
    }
    scale.map(|s| if s.abs() > SCALE_EPSILON { 1.0 / s } else { 0.0 })
}

/// Normalize a vector, falling back to `fallback` for degenerate input.
pub fn normalize_or(vector: Vec3, fallback: Vec3) -> Vec3 {
    vector.try_normalize(SCALE_EPSILON).unwrap_or(fallback)
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Pi / 2
    pub const HALF_PI: f32 = PI * 0.5;

    /// Pi / 4
    pub const QUARTER_PI: f32 = PI * 0.25;
}
