//! ECS Systems module

pub mod mesh_instancing;
pub mod transform_hierarchy;

pub use mesh_instancing::{GroupId, InstancingError, InstancingStats, MeshInstancingSystem, UploadStats};
pub use transform_hierarchy::{HierarchyStats, TransformHierarchySystem};
