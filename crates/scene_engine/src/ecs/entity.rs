//! Entity implementation
//!
//! An [`Entity`] is a generational handle: stale handles (the slot was freed
//! and reused) compare unequal to the live one and are rejected by the
//! registry. A [`Uuid`] gives the same entity a stable identity across
//! sessions.

use serde::{Deserialize, Serialize};

slotmap::new_key_type! {
    /// Entity identifier
    pub struct Entity;
}

/// Stable 64-bit entity identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uuid(pub u64);

impl Uuid {
    /// Generate a fresh random identifier
    pub fn new_random() -> Self {
        Self(rand::random())
    }

    /// Raw value
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Per-entity bookkeeping kept by the registry
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Display name
    pub name: String,
    /// Stable identifier
    pub uuid: Uuid,
}
