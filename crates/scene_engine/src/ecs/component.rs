//! Component trait

/// Built-in component categories carried by lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// `TransformComponent`
    Transform,
    /// `MeshComponent`
    Mesh,
    /// `LightComponent`
    Light,
    /// Any user-defined component
    Custom,
}

/// Marker trait for components
///
/// `KIND` tags lifecycle events so listeners can react to the built-in
/// component types without downcasting.
pub trait Component: 'static + Send + Sync {
    /// Category reported in `ComponentAdded/Updated/Deleted` events
    const KIND: ComponentKind = ComponentKind::Custom;
}
