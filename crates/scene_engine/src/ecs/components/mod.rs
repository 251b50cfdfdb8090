//! ECS Components module
//!
//! Built-in components understood by the scene systems.

pub mod lighting;
pub mod mesh;
pub mod transform;

pub use lighting::{LightComponent, LightFactory, LightInstance, LightKind};
pub use mesh::MeshComponent;
pub use transform::{HierarchyLinks, TransformComponent, TransformFactory, TransformUpdate};
