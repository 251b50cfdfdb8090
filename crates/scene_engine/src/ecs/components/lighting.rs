//! Lighting component for ECS
//!
//! Pure data component. Position and direction come from the entity's
//! transform, so a light parented to a moving object follows it.

use crate::ecs::{Component, ComponentKind};
use crate::foundation::math::Vec3;

/// Types of lights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    /// Parallel rays along the transform's forward axis
    Directional,
    /// Radiates in all directions from the transform's position
    Point,
    /// Cone along the transform's forward axis
    Spot,
}

/// Light parameters; fields a kind does not use are ignored
#[derive(Debug, Clone, PartialEq)]
pub struct LightComponent {
    /// The type of light
    pub kind: LightKind,
    /// RGB color (0.0 to 1.0 range)
    pub color: Vec3,
    /// Intensity multiplier
    pub intensity: f32,
    /// Maximum distance for point/spot lights
    pub range: f32,
    /// Inner cone angle for spot lights in radians
    pub inner_cone: f32,
    /// Outer cone angle for spot lights in radians
    pub outer_cone: f32,
    /// Whether the light is active
    pub enabled: bool,
    /// Whether the light casts shadows
    pub cast_shadows: bool,
}

impl Component for LightComponent {
    const KIND: ComponentKind = ComponentKind::Light;
}

/// World-space light, flattened for a renderer
#[derive(Debug, Clone, PartialEq)]
pub struct LightInstance {
    /// The type of light
    pub kind: LightKind,
    /// World position of the owning transform
    pub position: Vec3,
    /// World forward of the owning transform
    pub direction: Vec3,
    /// RGB color
    pub color: Vec3,
    /// Intensity multiplier
    pub intensity: f32,
    /// Maximum distance
    pub range: f32,
    /// Inner cone angle (radians)
    pub inner_cone: f32,
    /// Outer cone angle (radians)
    pub outer_cone: f32,
    /// Whether the light casts shadows
    pub cast_shadows: bool,
}

/// Factory functions for creating light components
pub struct LightFactory;

impl LightFactory {
    /// Directional light
    pub fn directional(color: Vec3, intensity: f32) -> LightComponent {
        LightComponent {
            kind: LightKind::Directional,
            color,
            intensity,
            range: 0.0,
            inner_cone: 0.0,
            outer_cone: 0.0,
            enabled: true,
            cast_shadows: true,
        }
    }

    /// Point light
    pub fn point(color: Vec3, intensity: f32, range: f32) -> LightComponent {
        LightComponent {
            kind: LightKind::Point,
            range,
            ..Self::directional(color, intensity)
        }
    }

    /// Spot light; `inner_cone` is clamped to `outer_cone`
    pub fn spot(color: Vec3, intensity: f32, range: f32, inner_cone: f32, outer_cone: f32) -> LightComponent {
        LightComponent {
            kind: LightKind::Spot,
            range,
            inner_cone: inner_cone.min(outer_cone),
            outer_cone,
            ..Self::directional(color, intensity)
        }
    }
}
