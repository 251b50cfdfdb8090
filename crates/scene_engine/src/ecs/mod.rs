//! Entity-Component-System implementation
//!
//! Entities are generational handles; components live in dense per-type
//! storages owned by the [`World`]. The built-in components and the systems
//! that keep them consistent live in [`components`] and [`systems`].

pub mod component;
pub mod components;
pub mod entity;
pub mod storage;
pub mod systems;
pub mod world;

pub use component::{Component, ComponentKind};
pub use components::{LightComponent, MeshComponent, TransformComponent};
pub use entity::{Entity, Uuid};
pub use world::World;
