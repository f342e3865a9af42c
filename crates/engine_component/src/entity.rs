//! Entity type and allocation utilities.
//!
//! An [`Entity`] is a lightweight `u64` identifier with no inherent data.
//! Identifiers are handed out by the [`EntityAllocator`] owned by the world
//! and are never recycled, so a stale handle can not alias a newer entity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;

/// A unique entity identifier.
///
/// Entities are pure identifiers and carry no data of their own. Components
/// are attached to entities to give them meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity(pub u64);

impl Entity {
    /// The null / invalid entity sentinel. Bindings that belong to no entity
    /// (system reactors) are keyed with it.
    pub const INVALID: Entity = Entity(0);

    /// Create an entity from a raw `u64` identifier.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw `u64` identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is a valid (non-zero) entity.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.0)
    }
}

/// Allocates monotonically increasing entity IDs.
///
/// IDs are never handed out twice, which keeps every query snapshot and
/// binding key that still mentions a destroyed entity unambiguous.
#[derive(Debug)]
pub struct EntityAllocator {
    next_id: u64,
}

impl EntityAllocator {
    /// Creates a new allocator. IDs start at 1 (0 is reserved for [`Entity::INVALID`]).
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocates a fresh entity ID.
    pub fn allocate(&mut self) -> Entity {
        let id = self.next_id;
        self.next_id += 1;
        Entity(id)
    }

    /// Returns the number of entities allocated so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.next_id - 1
    }
}

impl Default for EntityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Book-keeping for one live entity.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityRecord {
    /// Attached component types, in the order they were first set.
    pub components: Vec<ComponentTypeId>,
    /// Set while the entity is being torn down; further sets are rejected.
    pub despawning: bool,
}

impl EntityRecord {
    pub fn has(&self, type_id: ComponentTypeId) -> bool {
        self.components.contains(&type_id)
    }

    pub fn has_all(&self, required: &[ComponentTypeId]) -> bool {
        required.iter().all(|&ty| self.has(ty))
    }

    pub fn detach(&mut self, type_id: ComponentTypeId) {
        self.components.retain(|&ty| ty != type_id);
    }
}

/// The live-entity table: allocation plus per-entity component lists.
#[derive(Debug, Default)]
pub(crate) struct EntityRegistry {
    allocator: EntityAllocator,
    records: HashMap<Entity, EntityRecord>,
}

impl EntityRegistry {
    pub fn create(&mut self) -> Entity {
        let entity = self.allocator.allocate();
        self.records.insert(entity, EntityRecord::default());
        entity
    }

    pub fn record(&self, entity: Entity) -> Option<&EntityRecord> {
        self.records.get(&entity)
    }

    pub fn record_mut(&mut self, entity: Entity) -> Option<&mut EntityRecord> {
        self.records.get_mut(&entity)
    }

    pub fn release(&mut self, entity: Entity) -> Option<EntityRecord> {
        self.records.remove(&entity)
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.records.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter_records(&self) -> impl Iterator<Item = (Entity, &EntityRecord)> {
        self.records.iter().map(|(entity, record)| (*entity, record))
    }

    /// Live entities in ascending id order (creation order).
    pub fn entities(&self) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.records.keys().copied().collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_creation() {
        let e = Entity::from_raw(42);
        assert_eq!(e.id(), 42);
        assert!(e.is_valid());
    }

    #[test]
    fn test_entity_invalid() {
        assert!(!Entity::INVALID.is_valid());
        assert_eq!(Entity::INVALID.id(), 0);
    }

    #[test]
    fn test_allocator_produces_unique_ids() {
        let mut alloc = EntityAllocator::new();
        let e1 = alloc.allocate();
        let e2 = alloc.allocate();
        let e3 = alloc.allocate();
        assert_eq!(e1.id(), 1);
        assert_eq!(e2.id(), 2);
        assert_eq!(e3.id(), 3);
        assert_eq!(alloc.count(), 3);
    }

    #[test]
    fn test_registry_never_reuses_released_ids() {
        let mut registry = EntityRegistry::default();
        let a = registry.create();
        assert!(registry.release(a).is_some());
        let b = registry.create();
        assert_ne!(a, b);
        assert!(!registry.is_alive(a));
        assert!(registry.is_alive(b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_record_has_all() {
        let mut record = EntityRecord::default();
        record.components.push(ComponentTypeId(1));
        record.components.push(ComponentTypeId(2));
        assert!(record.has_all(&[ComponentTypeId(2), ComponentTypeId(1)]));
        assert!(!record.has_all(&[ComponentTypeId(3)]));
        record.detach(ComponentTypeId(1));
        assert!(!record.has(ComponentTypeId(1)));
        assert!(record.has_all(&[]));
    }
}
