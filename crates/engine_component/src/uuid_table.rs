//! Stable UUIDs for entities.
//!
//! Entity ids are process-local. Scenes, rendering and networking refer to
//! entities by [`EntityUuid`] instead; the [`UuidTable`] resolves one to the
//! other. The table is a cheaply cloneable handle over a concurrent map, so a
//! render or network thread can hold a copy and resolve ids while the world
//! keeps ticking. Only the world writes to it.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::Entity;

/// A stable, globally unique entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityUuid(pub Uuid);

impl EntityUuid {
    /// Generate a fresh random (v4) UUID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a UUID from its textual form.
    ///
    /// # Errors
    ///
    /// Returns the `uuid` parse error for malformed input.
    pub fn parse(text: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(text).map(Self)
    }
}

impl std::fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Published `uuid ↔ entity` lookup table.
#[derive(Debug, Clone, Default)]
pub struct UuidTable {
    by_uuid: Arc<DashMap<EntityUuid, Entity>>,
    by_entity: Arc<DashMap<Entity, EntityUuid>>,
}

impl UuidTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a UUID. A miss is a normal outcome.
    #[must_use]
    pub fn entity(&self, uuid: EntityUuid) -> Option<Entity> {
        self.by_uuid.get(&uuid).map(|entry| *entry.value())
    }

    /// The UUID assigned to `entity`, if any.
    #[must_use]
    pub fn uuid(&self, entity: Entity) -> Option<EntityUuid> {
        self.by_entity.get(&entity).map(|entry| *entry.value())
    }

    /// Number of mapped entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    /// Map `uuid` to `entity`, dropping the entity's previous UUID.
    ///
    /// Returns the entity that already owns `uuid`, without changing anything,
    /// when it belongs to someone else.
    pub(crate) fn assign(&self, entity: Entity, uuid: EntityUuid) -> Result<(), Entity> {
        if let Some(owner) = self.entity(uuid) {
            if owner != entity {
                return Err(owner);
            }
            return Ok(());
        }
        if let Some((_, previous)) = self.by_entity.remove(&entity) {
            self.by_uuid.remove(&previous);
        }
        self.by_uuid.insert(uuid, entity);
        self.by_entity.insert(entity, uuid);
        Ok(())
    }

    pub(crate) fn release(&self, entity: Entity) -> Option<EntityUuid> {
        let (_, uuid) = self.by_entity.remove(&entity)?;
        self.by_uuid.remove(&uuid);
        Some(uuid)
    }
}
