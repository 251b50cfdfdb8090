//! Mesh component for ECS
//!
//! Pure data: which shared mesh an entity draws and with which materials.
//! Membership in an instance group is derived from this by the instancing
//! system; nothing here touches the GPU.

use crate::assets::{MaterialId, MeshId};
use crate::ecs::{Component, ComponentKind};
use crate::render::InstanceKey;

/// Mesh reference plus one material per submesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshComponent {
    /// Shared mesh, if one is assigned
    pub mesh: Option<MeshId>,
    /// Materials in submesh order
    pub materials: Vec<MaterialId>,
    /// Hidden meshes belong to no instance group
    pub visible: bool,
}

impl Component for MeshComponent {
    const KIND: ComponentKind = ComponentKind::Mesh;
}

impl Default for MeshComponent {
    fn default() -> Self {
        Self {
            mesh: None,
            materials: Vec::new(),
            visible: true,
        }
    }
}

impl MeshComponent {
    /// Mesh with an explicit material list
    pub fn new(mesh: MeshId, materials: Vec<MaterialId>) -> Self {
        Self {
            mesh: Some(mesh),
            materials,
            visible: true,
        }
    }

    /// Single-submesh mesh with one material
    pub fn with_material(mesh: MeshId, material: MaterialId) -> Self {
        Self::new(mesh, vec![material])
    }

    /// Builder pattern: Set visibility
    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Group this component belongs to, `None` when it draws nothing
    pub fn instance_key(&self) -> Option<InstanceKey> {
        match self.mesh {
            Some(mesh) if self.visible => Some(InstanceKey {
                mesh,
                materials: self.materials.clone(),
            }),
            _ => None,
        }
    }

    /// Pad or truncate the material list to `submesh_count`, filling new
    /// slots with `fallback`
    pub fn fit_materials_to(&mut self, submesh_count: usize, fallback: MaterialId) {
        self.materials.resize(submesh_count, fallback);
    }
}
