//! Entity handles and local entity bookkeeping

use indexmap::IndexSet;
use rustc_hash::{FxBuildHasher, FxHashMap};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Unique identifier for an entity in the world
///
/// Carries no data. Ids are allocated by the native backend when one is
/// attached, otherwise by a local counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity(u32);

impl Entity {
    /// Wrap a raw id
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// The raw id
    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Entity {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Tracks live entities and the parent/child hierarchy
///
/// Iteration order is spawn order.
pub struct EntityManager {
    /// Live entities
    alive: IndexSet<Entity, FxBuildHasher>,
    /// Next id handed out when no backend allocates ids
    next_id: u32,
    /// Parent-child relationships
    children: FxHashMap<Entity, SmallVec<[Entity; 8]>>,
    /// Child-parent relationships
    parents: FxHashMap<Entity, Entity>,
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityManager {
    /// Create a new entity manager
    pub fn new() -> Self {
        Self {
            alive: IndexSet::default(),
            next_id: 1,
            children: FxHashMap::default(),
            parents: FxHashMap::default(),
        }
    }

    /// Allocate an id from the local counter
    pub fn allocate(&mut self) -> Entity {
        let entity = Entity(self.next_id);
        self.next_id += 1;
        entity
    }

    /// Mark an entity alive
    ///
    /// Returns false if it already was.
    pub fn register(&mut self, entity: Entity) -> bool {
        self.alive.insert(entity)
    }

    /// Forget an entity and unlink it from the hierarchy
    ///
    /// Children are orphaned, not despawned.
    pub fn unregister(&mut self, entity: Entity) -> bool {
        if !self.alive.shift_remove(&entity) {
            return false;
        }

        self.remove_parent(entity);
        if let Some(children) = self.children.remove(&entity) {
            for child in children {
                self.parents.remove(&child);
            }
        }
        true
    }

    /// Check if an entity is alive
    pub fn exists(&self, entity: Entity) -> bool {
        self.alive.contains(&entity)
    }

    /// Set parent-child relationship
    pub fn set_parent(&mut self, child: Entity, parent: Entity) {
        self.remove_parent(child);
        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
    }

    /// Remove parent relationship
    pub fn remove_parent(&mut self, child: Entity) {
        if let Some(parent) = self.parents.remove(&child) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|e| *e != child);
                if siblings.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
    }

    /// Get parent of an entity
    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.parents.get(&entity).copied()
    }

    /// Get children of an entity
    pub fn children(&self, entity: Entity) -> &[Entity] {
        self.children
            .get(&entity)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get all live entities in spawn order
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive.iter().copied()
    }

    /// Get entity count
    pub fn len(&self) -> usize {
        self.alive.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.alive.is_empty()
    }
}
