//! # Scene Engine
//!
//! The scene core of a real-time 3D engine: an entity-component store, a
//! parent/child transform hierarchy, and mesh instancing that batches
//! identical meshes into one GPU transform buffer per group.
//!
//! ## Features
//!
//! - **ECS Storage**: Generational entity handles with dense per-type component storage
//! - **Transform Hierarchy**: Cached world matrices, rebuilt for a whole subtree on change
//! - **Mesh Instancing**: Slot-stable instance groups with tombstones and batched uploads
//! - **Event Bus**: Scene-filtered publish/subscribe with nested publish queuing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scene_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventManager::shared();
//!     let mut scene = Scene::new("level", bus, SceneConfig::default());
//!     let mut assets = AssetRegistry::new();
//!     let mut gpu = HeadlessGpu::new();
//!
//!     let cube = assets.insert_mesh("cube", 1)?;
//!     let ship = scene.create_entity("ship");
//!     let turret = scene.create_entity("turret");
//!     scene.assign_mesh(turret, cube, &assets)?;
//!     scene.set_parent(turret, ship);
//!     scene.set_position(ship, Vec3::new(0.0, 0.0, -10.0));
//!
//!     scene.end_frame(&mut gpu)?;
//!     for draw in scene.draw_list(&assets) {
//!         println!("{} x{}", draw.mesh_name, draw.instance_count);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod ecs;
pub mod events;
pub mod assets;
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{AssetError, AssetLoadQueue, AssetLookup, AssetRegistry, LoadedMesh, Material, MaterialId, MeshId},
        config::{Config, SceneConfig},
        ecs::{
            components::{LightFactory, LightKind, TransformFactory, TransformUpdate},
            Component, ComponentKind, Entity, LightComponent, MeshComponent, TransformComponent, Uuid, World,
        },
        events::{Event, EventKind, EventManager, SceneFilter, SceneId},
        foundation::math::{Mat4, Quat, Transform, Vec3},
        render::{GpuBuffers, HeadlessGpu, InstancedDraw},
        scene::{FrameStats, Scene, SceneCommand},
    };
}
