//! Asset identifiers and lookup
//!
//! The scene core never owns geometry or material data. Components hold
//! [`MeshId`] / [`MaterialId`] values and resolve them through an
//! [`AssetLookup`] when the renderer asks for a draw list. Loading happens
//! elsewhere; finished loads are handed back through an [`AssetLoadQueue`].

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ecs::Entity;

/// Mesh asset identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u64);

/// Material identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(pub u64);

impl MaterialId {
    /// Material used for submeshes that have nothing assigned
    pub const DEFAULT: Self = Self(0);
}

/// Shared mesh geometry as seen by the scene core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshAsset {
    /// Display name
    pub name: String,
    /// Number of submeshes, one material slot each
    pub submesh_count: usize,
}

/// Material as seen by the scene core
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Display name
    pub name: String,
    /// Linear RGBA base color
    pub base_color: [f32; 4],
}

impl Material {
    /// Opaque material with the given color
    pub fn new(name: impl Into<String>, base_color: [f32; 4]) -> Self {
        Self { name: name.into(), base_color }
    }
}

/// Asset errors
#[derive(Debug, Error)]
pub enum AssetError {
    /// No mesh registered under the id
    #[error("Unknown mesh asset: {0:?}")]
    UnknownMesh(MeshId),

    /// No material registered under the id
    #[error("Unknown material: {0:?}")]
    UnknownMaterial(MaterialId),

    /// Meshes need at least one submesh to be drawable
    #[error("Mesh '{0}' has no submeshes")]
    EmptyMesh(String),
}

/// Read access to assets by id
pub trait AssetLookup {
    /// Resolve a mesh id
    fn mesh_asset(&self, id: MeshId) -> Option<&MeshAsset>;

    /// Resolve a material id
    fn material(&self, id: MaterialId) -> Option<&Material>;
}

/// In-memory asset table
pub struct AssetRegistry {
    meshes: HashMap<MeshId, MeshAsset>,
    materials: HashMap<MaterialId, Material>,
    next_id: u64,
}

impl AssetRegistry {
    /// Create a registry holding only the default material
    pub fn new() -> Self {
        let mut materials = HashMap::new();
        materials.insert(MaterialId::DEFAULT, Material::new("default", [0.8, 0.8, 0.8, 1.0]));
        Self {
            meshes: HashMap::new(),
            materials,
            next_id: 1, // 0 is the default material
        }
    }

    /// Register a mesh
    pub fn insert_mesh(&mut self, name: impl Into<String>, submesh_count: usize) -> Result<MeshId, AssetError> {
        let name = name.into();
        if submesh_count == 0 {
            return Err(AssetError::EmptyMesh(name));
        }
        let id = MeshId(self.allocate_id());
        log::debug!("Registered mesh '{name}' as {id:?} ({submesh_count} submeshes)");
        self.meshes.insert(id, MeshAsset { name, submesh_count });
        Ok(id)
    }

    /// Register a material
    pub fn insert_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.allocate_id());
        log::debug!("Registered material '{}' as {id:?}", material.name);
        self.materials.insert(id, material);
        id
    }

    /// Resolve a mesh or fail
    pub fn require_mesh(&self, id: MeshId) -> Result<&MeshAsset, AssetError> {
        self.meshes.get(&id).ok_or(AssetError::UnknownMesh(id))
    }

    /// Resolve a material or fail
    pub fn require_material(&self, id: MaterialId) -> Result<&Material, AssetError> {
        self.materials.get(&id).ok_or(AssetError::UnknownMaterial(id))
    }

    /// Number of registered meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetLookup for AssetRegistry {
    fn mesh_asset(&self, id: MeshId) -> Option<&MeshAsset> {
        self.meshes.get(&id)
    }

    fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(&id)
    }
}

/// A finished background load, ready to be applied to an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedMesh {
    /// Entity the load was requested for
    pub entity: Entity,
    /// Resolved mesh
    pub mesh: MeshId,
    /// Materials, one per submesh
    pub materials: Vec<MaterialId>,
}

/// Channel between loader threads and the main thread
///
/// Workers get a cloned [`Sender`]; the scene drains the queue once per frame.
pub struct AssetLoadQueue {
    sender: Sender<LoadedMesh>,
    receiver: Receiver<LoadedMesh>,
}

impl AssetLoadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// Handle for a worker thread
    pub fn sender(&self) -> Sender<LoadedMesh> {
        self.sender.clone()
    }

    /// Take everything delivered so far without blocking
    pub fn drain(&self) -> Vec<LoadedMesh> {
        self.receiver.try_iter().collect()
    }
}

impl Default for AssetLoadQueue {
    fn default() -> Self {
        Self::new()
    }
}
