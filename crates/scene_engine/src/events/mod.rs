//! Event system
//!
//! Publish/subscribe bus that decouples the scene systems from whoever
//! observes them.
//! - Closed [`Event`] enum; listeners register per [`EventKind`]
//! - Scene filtering: scene-bound events only reach listeners for that scene
//!   (or [`SceneFilter::Any`]); window/input events reach every listener of
//!   their kind
//! - Synchronous delivery in registration order
//! - Events published from inside a listener are queued and delivered after
//!   the current one, before the outer `publish` returns
//! - Deferred delivery through `post` / `dispatch_posted`
//!
//! The manager uses interior mutability so it can be shared as
//! `Rc<EventManager>` between scenes and the code listening to them.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::ecs::components::TransformUpdate;
use crate::ecs::{ComponentKind, Entity};

/// Scene identifier, allocated by the [`EventManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(pub u32);

/// Every event the scene core publishes
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A transform's world matrix was rebuilt
    TransformUpdated {
        /// Originating scene
        scene: SceneId,
        /// Entity owning the transform
        entity: Entity,
        /// What changed
        update: TransformUpdate,
    },
    /// A component was attached
    ComponentAdded {
        /// Originating scene
        scene: SceneId,
        /// Owning entity
        entity: Entity,
        /// Component category
        component: ComponentKind,
    },
    /// A component was modified through the scene
    ComponentUpdated {
        /// Originating scene
        scene: SceneId,
        /// Owning entity
        entity: Entity,
        /// Component category
        component: ComponentKind,
    },
    /// A component is about to be removed; it is still readable while this
    /// event is delivered
    ComponentDeleted {
        /// Originating scene
        scene: SceneId,
        /// Owning entity
        entity: Entity,
        /// Component category
        component: ComponentKind,
    },
    /// An entity was created
    EntityCreated {
        /// Originating scene
        scene: SceneId,
        /// New entity
        entity: Entity,
    },
    /// An entity was destroyed; the handle is already stale
    EntityDestroyed {
        /// Originating scene
        scene: SceneId,
        /// Destroyed entity
        entity: Entity,
    },
    /// The output window changed size
    WindowResized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
    /// A key was pressed
    KeyPressed {
        /// Platform key code
        key_code: u32,
        /// Auto-repeat
        repeat: bool,
    },
}

/// Event type identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::TransformUpdated`]
    TransformUpdated,
    /// [`Event::ComponentAdded`]
    ComponentAdded,
    /// [`Event::ComponentUpdated`]
    ComponentUpdated,
    /// [`Event::ComponentDeleted`]
    ComponentDeleted,
    /// [`Event::EntityCreated`]
    EntityCreated,
    /// [`Event::EntityDestroyed`]
    EntityDestroyed,
    /// [`Event::WindowResized`]
    WindowResized,
    /// [`Event::KeyPressed`]
    KeyPressed,
}

impl Event {
    /// Type tag used for listener registration
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TransformUpdated { .. } => EventKind::TransformUpdated,
            Self::ComponentAdded { .. } => EventKind::ComponentAdded,
            Self::ComponentUpdated { .. } => EventKind::ComponentUpdated,
            Self::ComponentDeleted { .. } => EventKind::ComponentDeleted,
            Self::EntityCreated { .. } => EventKind::EntityCreated,
            Self::EntityDestroyed { .. } => EventKind::EntityDestroyed,
            Self::WindowResized { .. } => EventKind::WindowResized,
            Self::KeyPressed { .. } => EventKind::KeyPressed,
        }
    }

    /// Originating scene, `None` for window/input events
    pub const fn scene(&self) -> Option<SceneId> {
        match self {
            Self::TransformUpdated { scene, .. }
            | Self::ComponentAdded { scene, .. }
            | Self::ComponentUpdated { scene, .. }
            | Self::ComponentDeleted { scene, .. }
            | Self::EntityCreated { scene, .. }
            | Self::EntityDestroyed { scene, .. } => Some(*scene),
            Self::WindowResized { .. } | Self::KeyPressed { .. } => None,
        }
    }

    /// Entity the event is about, if any
    pub const fn entity(&self) -> Option<Entity> {
        match self {
            Self::TransformUpdated { entity, .. }
            | Self::ComponentAdded { entity, .. }
            | Self::ComponentUpdated { entity, .. }
            | Self::ComponentDeleted { entity, .. }
            | Self::EntityCreated { entity, .. }
            | Self::EntityDestroyed { entity, .. } => Some(*entity),
            Self::WindowResized { .. } | Self::KeyPressed { .. } => None,
        }
    }
}

/// Which scenes a listener hears from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneFilter {
    /// Every scene
    Any,
    /// One scene only
    Scene(SceneId),
}

impl SceneFilter {
    /// Whether an event from `scene` passes the filter
    pub fn matches(self, scene: Option<SceneId>) -> bool {
        match (self, scene) {
            (Self::Scene(wanted), Some(scene)) => wanted == scene,
            _ => true,
        }
    }
}

/// Event handler trait
pub trait EventListener {
    /// Handle an event
    fn on_event(&mut self, event: &Event);
}

impl<F: FnMut(&Event)> EventListener for F {
    fn on_event(&mut self, event: &Event) {
        self(event);
    }
}

/// Registration handle returned by [`EventManager::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    filter: SceneFilter,
    active: Cell<bool>,
    listener: RefCell<Box<dyn EventListener>>,
}

/// Resets the dispatching flag even if a listener panics
struct DispatchGuard<'a>(&'a Cell<bool>);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Event bus with registration and queuing
pub struct EventManager {
    registrations: RefCell<Vec<Rc<Registration>>>,
    pending: RefCell<VecDeque<Event>>,
    posted: RefCell<Vec<Event>>,
    dispatching: Cell<bool>,
    next_listener: Cell<u64>,
    next_scene: Cell<u32>,
    delivered: Cell<usize>,
}

impl EventManager {
    /// Create a new empty event manager
    pub fn new() -> Self {
        Self {
            registrations: RefCell::new(Vec::new()),
            pending: RefCell::new(VecDeque::new()),
            posted: RefCell::new(Vec::new()),
            dispatching: Cell::new(false),
            next_listener: Cell::new(0),
            next_scene: Cell::new(0),
            delivered: Cell::new(0),
        }
    }

    /// Create a manager ready to be shared between scenes
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::new())
    }

    /// Hand out a fresh scene id
    pub fn allocate_scene_id(&self) -> SceneId {
        let id = self.next_scene.get();
        self.next_scene.set(id + 1);
        SceneId(id)
    }

    /// Register a listener for one event kind
    pub fn subscribe(&self, kind: EventKind, filter: SceneFilter, listener: impl EventListener + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.registrations.borrow_mut().push(Rc::new(Registration {
            id,
            kind,
            filter,
            active: Cell::new(true),
            listener: RefCell::new(Box::new(listener)),
        }));
        log::debug!("Listener {id:?} subscribed to {kind:?} ({filter:?})");
        id
    }

    /// Remove a listener. Takes effect immediately, even for an event that
    /// is currently being delivered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations.borrow_mut();
        match registrations.iter().position(|registration| registration.id == id) {
            Some(index) => {
                registrations.remove(index).active.set(false);
                true
            }
            None => {
                log::warn!("Unsubscribe of unknown listener {id:?}");
                false
            }
        }
    }

    /// Deliver an event to every matching listener
    pub fn publish(&self, event: Event) {
        self.pending.borrow_mut().push_back(event);
        if self.dispatching.get() {
            return;
        }

        self.dispatching.set(true);
        let _guard = DispatchGuard(&self.dispatching);
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(event) = next else {
                break;
            };
            self.deliver(&event);
        }
    }

    /// Queue an event for the next `dispatch_posted`
    pub fn post(&self, event: Event) {
        self.posted.borrow_mut().push(event);
    }

    /// Publish everything posted so far; returns how many events went out
    pub fn dispatch_posted(&self) -> usize {
        let posted = std::mem::take(&mut *self.posted.borrow_mut());
        let count = posted.len();
        for event in posted {
            self.publish(event);
        }
        count
    }

    /// Drop posted events without delivering them
    pub fn clear_posted(&self) {
        self.posted.borrow_mut().clear();
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.registrations.borrow().len()
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count_for(&self, kind: EventKind) -> usize {
        self.registrations
            .borrow()
            .iter()
            .filter(|registration| registration.kind == kind)
            .count()
    }

    /// Total listener invocations so far
    pub fn delivered_count(&self) -> usize {
        self.delivered.get()
    }

    fn deliver(&self, event: &Event) {
        let kind = event.kind();
        let scene = event.scene();
        let targets: Vec<Rc<Registration>> = self
            .registrations
            .borrow()
            .iter()
            .filter(|registration| registration.kind == kind && registration.filter.matches(scene))
            .cloned()
            .collect();

        for registration in targets {
            if !registration.active.get() {
                continue;
            }
            match registration.listener.try_borrow_mut() {
                Ok(mut listener) => {
                    listener.on_event(event);
                    self.delivered.set(self.delivered.get() + 1);
                }
                Err(_) => log::error!("Listener {:?} re-entered while handling {kind:?}", registration.id),
            }
        }
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}
