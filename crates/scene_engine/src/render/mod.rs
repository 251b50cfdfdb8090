//! Rendering interface
//!
//! Everything the scene core exposes to a renderer: the GPU buffer capability
//! it writes through, the instance groups it maintains, and the resolved draw
//! list handed over once per frame.

pub mod gpu;
pub mod instance_group;

pub use gpu::{BufferHandle, GpuBuffers, GpuError, GpuStats, HeadlessGpu};
pub use instance_group::{GroupStats, GroupUpload, InstanceGroup, InstanceKey, InstanceTransformRaw};

use crate::assets::{MaterialId, MeshId};

/// One instanced draw call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancedDraw {
    /// Mesh to draw
    pub mesh: MeshId,
    /// Mesh display name
    pub mesh_name: String,
    /// Materials, one per submesh
    pub materials: Vec<MaterialId>,
    /// Buffer holding one `InstanceTransformRaw` per instance
    pub instance_buffer: BufferHandle,
    /// Instances to draw, tombstones included
    pub instance_count: u32,
}
