//! The [`World`]: entity registry, component store, queries and bindings.
//!
//! Everything that changes component state goes through
//! [`World::set_component`], [`World::update_component`],
//! [`World::remove_component`] or [`World::destroy_entity`]. Each of them
//! keeps the live queries and reactive bindings in step before returning.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::commands::Commands;
use crate::component::{
    Component, ComponentDescriptor, ComponentTypeId, JsonCodec, JsonComponent,
};
use crate::entity::{Entity, EntityRegistry};
use crate::error::EcsError;
use crate::query::QueryEngine;
use crate::reactor::{BindingKey, BindingTable};
use crate::storage::ComponentStore;
use crate::uuid_table::{EntityUuid, UuidTable};

/// Behaviour switches for a [`World`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Destroying an entity that does not exist is an error instead of a
    /// no-op.
    pub strict_entities: bool,
}

/// Entity and component state plus the live views derived from it.
#[derive(Default)]
pub struct World {
    config: WorldConfig,
    pub(crate) entities: EntityRegistry,
    pub(crate) store: ComponentStore,
    descriptors: HashMap<ComponentTypeId, ComponentDescriptor>,
    pub(crate) queries: QueryEngine,
    pub(crate) bindings: BindingTable,
    uuids: UuidTable,
    /// Components whose removal is in progress.
    removing: HashSet<(Entity, ComponentTypeId)>,
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new(config: WorldConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> WorldConfig {
        self.config
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Register component type `T`. Registering the same type again is a
    /// no-op; a different type under the same name is rejected.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponent`] if the name belongs to another type.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentTypeId, EcsError> {
        let type_id = T::component_type_id();
        match self.descriptors.get(&type_id) {
            Some(descriptor) if descriptor.rust_type == TypeId::of::<T>() => Ok(type_id),
            Some(_) => Err(EcsError::DuplicateComponent(T::type_name().to_string())),
            None => {
                self.descriptors
                    .insert(type_id, ComponentDescriptor::of::<T>());
                debug!(component = T::type_name(), "component registered");
                Ok(type_id)
            }
        }
    }

    /// Register `T` together with its JSON contract, making it reachable
    /// from [`World::set_component_json`] and snapshots.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateComponent`] if the name belongs to another type.
    pub fn register_json_component<T: JsonComponent>(
        &mut self,
    ) -> Result<ComponentTypeId, EcsError> {
        let type_id = self.register_component::<T>()?;
        if let Some(descriptor) = self.descriptors.get_mut(&type_id) {
            descriptor.json = Some(JsonCodec::of::<T>());
        }
        Ok(type_id)
    }

    /// Resolve a registered component name.
    #[must_use]
    pub fn component_id_by_name(&self, name: &str) -> Option<ComponentTypeId> {
        let type_id = ComponentTypeId::from_name(name);
        self.descriptors
            .get(&type_id)
            .filter(|descriptor| descriptor.name == name)
            .map(|descriptor| descriptor.type_id)
    }

    #[must_use]
    pub fn component_name(&self, type_id: ComponentTypeId) -> Option<&'static str> {
        self.descriptors.get(&type_id).map(|descriptor| descriptor.name)
    }

    /// Names of every registered component type, sorted.
    #[must_use]
    pub fn component_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.descriptors.values().map(|descriptor| descriptor.name).collect();
        names.sort_unstable();
        names
    }

    // ── Entities ────────────────────────────────────────────────────────

    /// Create a new entity with no components.
    pub fn create_entity(&mut self) -> Entity {
        let entity = self.entities.create();
        self.track_create(entity);
        debug!(%entity, "entity created");
        entity
    }

    /// Destroy `entity`: remove every component (newest first), unmount all
    /// of its bindings and drop its UUID.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] for a missing entity, but only when
    /// [`WorldConfig::strict_entities`] is set.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<(), EcsError> {
        let components = match self.entities.record_mut(entity) {
            Some(record) if !record.despawning => {
                record.despawning = true;
                record.components.clone()
            }
            // Already tearing down further up the stack.
            Some(_) => return Ok(()),
            None if self.config.strict_entities => return Err(EcsError::EntityNotFound(entity)),
            None => return Ok(()),
        };

        for type_id in components.into_iter().rev() {
            let Some(remove) = self.descriptors.get(&type_id).map(|d| d.remove_fn) else {
                continue;
            };
            if let Err(err) = remove(self, entity) {
                warn!(%entity, error = %err, "component removal during destroy reported an error");
            }
        }

        self.track_release(entity);
        self.unmount_entity_bindings(entity);
        self.uuids.release(entity);
        self.entities.release(entity);
        debug!(%entity, "entity destroyed");
        Ok(())
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Live entities in creation order.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        self.entities.entities()
    }

    /// Component types attached to `entity`, in the order they were added.
    #[must_use]
    pub fn entity_components(&self, entity: Entity) -> Vec<ComponentTypeId> {
        self.entities
            .record(entity)
            .map(|record| record.components.clone())
            .unwrap_or_default()
    }

    // ── UUIDs ───────────────────────────────────────────────────────────

    /// Assign `uuid` to `entity`, replacing any UUID it had.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] for a dead entity and
    /// [`EcsError::DuplicateUuid`] if another entity holds `uuid`.
    pub fn set_entity_uuid(&mut self, entity: Entity, uuid: EntityUuid) -> Result<(), EcsError> {
        if !self.entities.is_alive(entity) {
            return Err(EcsError::EntityNotFound(entity));
        }
        self.uuids
            .assign(entity, uuid)
            .map_err(|owner| EcsError::DuplicateUuid { uuid, owner })
    }

    #[must_use]
    pub fn entity_uuid(&self, entity: Entity) -> Option<EntityUuid> {
        self.uuids.uuid(entity)
    }

    #[must_use]
    pub fn entity_by_uuid(&self, uuid: EntityUuid) -> Option<Entity> {
        self.uuids.entity(uuid)
    }

    /// Resolve `uuid`, falling back to a secondary lookup on a miss.
    pub fn entity_by_uuid_or_else(
        &self,
        uuid: EntityUuid,
        fallback: impl FnOnce(&World, EntityUuid) -> Option<Entity>,
    ) -> Option<Entity> {
        self.uuids.entity(uuid).or_else(|| fallback(self, uuid))
    }

    /// # Errors
    ///
    /// [`EcsError::UuidNotFound`] if no entity holds `uuid`.
    pub fn require_entity_by_uuid(&self, uuid: EntityUuid) -> Result<Entity, EcsError> {
        self.uuids.entity(uuid).ok_or(EcsError::UuidNotFound(uuid))
    }

    /// A shared handle to the UUID table for readers on other threads.
    #[must_use]
    pub fn uuid_table(&self) -> UuidTable {
        self.uuids.clone()
    }

    // ── Components ──────────────────────────────────────────────────────

    /// Set component `T` on `entity`.
    ///
    /// The first set builds the value with [`Component::on_init`] before
    /// merging `patch`; later sets merge into the existing value. On first
    /// set the queries are updated, then the hook's commands run, then the
    /// component's reactor is mounted.
    ///
    /// # Errors
    ///
    /// [`EcsError::EntityNotFound`] for a dead (or dying) entity,
    /// [`EcsError::DuplicateComponent`] for a name clash, or the first error
    /// of a queued command.
    pub fn set_component<T: Component>(
        &mut self,
        entity: Entity,
        patch: T::Patch,
    ) -> Result<(), EcsError> {
        let type_id = self.register_component::<T>()?;
        if !self
            .entities
            .record(entity)
            .is_some_and(|record| !record.despawning)
        {
            return Err(EcsError::EntityNotFound(entity));
        }

        let mut commands = Commands::new();
        let column = self.store.column_or_insert::<T>();
        let inserted = if let Some(value) = column.get_mut(entity) {
            value.on_set(entity, patch, &mut commands);
            false
        } else {
            let mut value = T::on_init(entity);
            value.on_set(entity, patch, &mut commands);
            column.insert(entity, value);
            true
        };

        if inserted {
            if let Some(record) = self.entities.record_mut(entity) {
                record.components.push(type_id);
            }
            debug!(%entity, component = T::type_name(), "component added");
            self.track_insert(entity, type_id);
        }

        let applied = commands.apply(self);

        let key = BindingKey::component(entity, type_id);
        if inserted && self.store.contains(entity, type_id) && !self.is_mounted(key) {
            if let Some(reactor) = T::reactor() {
                self.mount_binding(key, reactor);
            }
        }

        self.refresh_bindings(entity);
        applied
    }

    /// Borrow component `T` of `entity`.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingComponent`] if it is not attached.
    pub fn get_component<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        self.get_optional_component::<T>(entity)
            .ok_or(EcsError::MissingComponent {
                entity,
                component: T::type_name(),
            })
    }

    #[must_use]
    pub fn get_optional_component<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.store.column::<T>()?.get(entity)
    }

    #[must_use]
    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.store.contains(entity, T::component_type_id())
    }

    /// Mutate component `T` in place, then re-check the entity's binding
    /// dependencies.
    ///
    /// # Errors
    ///
    /// [`EcsError::MissingComponent`] if it is not attached.
    pub fn update_component<T: Component, R>(
        &mut self,
        entity: Entity,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, EcsError> {
        let value = self
            .store
            .column_mut::<T>()
            .and_then(|column| column.get_mut(entity))
            .ok_or(EcsError::MissingComponent {
                entity,
                component: T::type_name(),
            })?;
        let result = f(value);
        self.refresh_bindings(entity);
        Ok(result)
    }

    /// Remove component `T` from `entity`.
    ///
    /// Runs [`Component::on_remove`], unmounts the component's binding while
    /// the value is still stored, reports query exits, then frees the value.
    /// Returns `Ok(false)` if the component was not attached.
    ///
    /// # Errors
    ///
    /// The first error of a command queued by `on_remove`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) -> Result<bool, EcsError> {
        let type_id = T::component_type_id();
        if !self.store.contains(entity, type_id) || !self.removing.insert((entity, type_id)) {
            return Ok(false);
        }

        let mut commands = Commands::new();
        if let Some(value) = self
            .store
            .column_mut::<T>()
            .and_then(|column| column.get_mut(entity))
        {
            value.on_remove(entity, &mut commands);
        }

        self.unmount_binding(BindingKey::component(entity, type_id));
        self.track_remove(entity, type_id);

        if let Some(column) = self.store.column_mut::<T>() {
            column.remove(entity);
        }
        if let Some(record) = self.entities.record_mut(entity) {
            record.detach(type_id);
        }
        self.removing.remove(&(entity, type_id));
        debug!(%entity, component = T::type_name(), "component removed");

        let applied = commands.apply(self);
        self.refresh_bindings(entity);
        applied.map(|()| true)
    }

    /// Total number of component instances.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.store.instance_count()
    }

    // ── JSON ────────────────────────────────────────────────────────────

    /// Apply a JSON patch to the component named `name`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponent`], [`EcsError::NotSerialisable`],
    /// [`EcsError::Json`] for a malformed payload, or any error of
    /// [`World::set_component`].
    pub fn set_component_json(
        &mut self,
        entity: Entity,
        name: &str,
        json: Value,
    ) -> Result<(), EcsError> {
        let codec = self.json_codec(name)?;
        (codec.set_from_json)(self, entity, json)
    }

    /// Serialise the component named `name`. `Ok(None)` when it is not
    /// attached to `entity`.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponent`] or [`EcsError::NotSerialisable`].
    pub fn component_json(&self, entity: Entity, name: &str) -> Result<Option<Value>, EcsError> {
        let codec = self.json_codec(name)?;
        Ok((codec.to_json)(self, entity))
    }

    pub(crate) fn json_codec_by_id(&self, type_id: ComponentTypeId) -> Option<JsonCodec> {
        self.descriptors.get(&type_id).and_then(|descriptor| descriptor.json)
    }

    fn json_codec(&self, name: &str) -> Result<JsonCodec, EcsError> {
        let type_id = self
            .component_id_by_name(name)
            .ok_or_else(|| EcsError::UnknownComponent(name.to_string()))?;
        self.json_codec_by_id(type_id)
            .ok_or_else(|| EcsError::NotSerialisable(name.to_string()))
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("entities", &self.entities.len())
            .field("components", &self.store.instance_count())
            .field("queries", &self.queries.len())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}
