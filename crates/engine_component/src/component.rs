//! Core [`Component`] trait and associated metadata.
//!
//! A component type is a Rust type with a globally unique name and a small
//! lifecycle: [`Component::on_init`] builds the default state the first time
//! the component is set on an entity, [`Component::on_set`] merges each
//! incoming patch into it, and [`Component::on_remove`] runs right before the
//! storage is freed. A type may also provide a [`Reactor`] that is mounted
//! while the component is attached.
//!
//! ## Type Identity
//!
//! [`ComponentTypeId`] is derived from the component's **string name** using
//! the FNV-1a 64-bit hash algorithm, so the same name always maps to the same
//! id. Names are what scene files, visual-script nodes and tools refer to.

use std::any::TypeId;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::Commands;
use crate::entity::Entity;
use crate::error::EcsError;
use crate::reactor::Reactor;
use crate::world::World;

/// A unique identifier for a component type, derived from its string name
/// using the FNV-1a 64-bit hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ComponentTypeId(pub u64);

impl ComponentTypeId {
    /// FNV-1a 64-bit offset basis.
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

    /// FNV-1a 64-bit prime.
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    /// Compute the [`ComponentTypeId`] from a component's string name.
    ///
    /// ```text
    /// hash = 0xcbf29ce484222325          (offset basis)
    /// for each byte in name.as_bytes():
    ///     hash = hash XOR byte
    ///     hash = hash * 0x00000100000001b3  (prime)
    /// return hash
    /// ```
    #[must_use]
    pub const fn from_name(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut hash = Self::FNV_OFFSET_BASIS;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(Self::FNV_PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// Compute the [`ComponentTypeId`] for a Rust component type `T`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        T::component_type_id()
    }
}

/// The core component trait.
///
/// # Examples
///
/// ```rust
/// use engine_component::{Commands, Component, Entity};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// /// Fields left as `None` keep their current value.
/// #[derive(Default)]
/// struct HealthPatch {
///     current: Option<f32>,
///     max: Option<f32>,
/// }
///
/// impl Component for Health {
///     type Patch = HealthPatch;
///
///     fn type_name() -> &'static str { "Health" }
///
///     fn on_init(_entity: Entity) -> Self {
///         Self { current: 100.0, max: 100.0 }
///     }
///
///     fn on_set(&mut self, _entity: Entity, patch: HealthPatch, _commands: &mut Commands) {
///         if let Some(max) = patch.max { self.max = max; }
///         if let Some(current) = patch.current { self.current = current.min(self.max); }
///     }
/// }
/// ```
pub trait Component: Sized + 'static {
    /// Partial data accepted by [`World::set_component`].
    type Patch: 'static;

    /// The globally unique name of this component type.
    fn type_name() -> &'static str;

    /// Returns the [`ComponentTypeId`] for this component.
    fn component_type_id() -> ComponentTypeId {
        ComponentTypeId::from_name(Self::type_name())
    }

    /// Builds the default state the first time the component is set.
    fn on_init(entity: Entity) -> Self;

    /// Validates and merges `patch` into the current state.
    ///
    /// Changes to other components must go through `commands`; they are
    /// applied right after this hook returns.
    fn on_set(&mut self, entity: Entity, patch: Self::Patch, commands: &mut Commands);

    /// Runs before the component's storage is freed.
    fn on_remove(&mut self, entity: Entity, commands: &mut Commands) {
        let _ = (entity, commands);
    }

    /// Reactive behaviour mounted while the component is attached to an
    /// entity. Called once per mount.
    fn reactor() -> Option<Reactor> {
        None
    }
}

/// Components with a JSON serialisation contract.
///
/// `on_set(patch_from_json(to_json(x)))` must reproduce every serialisable
/// field of `x`.
pub trait JsonComponent: Component {
    /// Serialise the current state.
    fn to_json(&self) -> Value;

    /// Parse a patch from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when `json` does not describe a patch.
    fn patch_from_json(json: Value) -> Result<Self::Patch, serde_json::Error>;
}

/// Type-erased JSON hooks of a [`JsonComponent`].
#[derive(Clone, Copy)]
pub(crate) struct JsonCodec {
    pub to_json: fn(&World, Entity) -> Option<Value>,
    pub set_from_json: fn(&mut World, Entity, Value) -> Result<(), EcsError>,
    /// Parses a patch without applying it.
    pub validate: fn(&Value) -> Result<(), EcsError>,
}

impl JsonCodec {
    pub fn of<T: JsonComponent>() -> Self {
        Self {
            to_json: |world, entity| world.get_optional_component::<T>(entity).map(T::to_json),
            set_from_json: |world, entity, json| {
                let patch = T::patch_from_json(json).map_err(|source| EcsError::Json {
                    component: T::type_name().to_string(),
                    source,
                })?;
                world.set_component::<T>(entity, patch)
            },
            validate: |json| {
                T::patch_from_json(json.clone())
                    .map(drop)
                    .map_err(|source| EcsError::Json {
                        component: T::type_name().to_string(),
                        source,
                    })
            },
        }
    }
}

/// Runtime description of a registered component type.
#[derive(Clone)]
pub(crate) struct ComponentDescriptor {
    pub type_id: ComponentTypeId,
    pub name: &'static str,
    pub rust_type: TypeId,
    /// Monomorphised `World::remove_component::<T>`, used for cascades.
    pub remove_fn: fn(&mut World, Entity) -> Result<bool, EcsError>,
    pub json: Option<JsonCodec>,
}

impl ComponentDescriptor {
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: T::component_type_id(),
            name: T::type_name(),
            rust_type: TypeId::of::<T>(),
            remove_fn: |world, entity| world.remove_component::<T>(entity),
            json: None,
        }
    }
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .field("json", &self.json.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Health {
        current: f32,
        max: f32,
    }

    impl Component for Health {
        type Patch = Health;

        fn type_name() -> &'static str {
            "Health"
        }

        fn on_init(_entity: Entity) -> Self {
            Self {
                current: 100.0,
                max: 100.0,
            }
        }

        fn on_set(&mut self, _entity: Entity, patch: Health, _commands: &mut Commands) {
            *self = patch;
        }
    }

    #[test]
    fn test_component_type_id_matches_from_name() {
        assert_eq!(
            Health::component_type_id(),
            ComponentTypeId::from_name("Health")
        );
        assert_eq!(ComponentTypeId::of::<Health>(), Health::component_type_id());
    }

    #[test]
    fn test_component_type_id_from_name_is_deterministic() {
        let id = ComponentTypeId::from_name("Health");
        assert_eq!(id, ComponentTypeId::from_name("Health"));
        assert_ne!(id, ComponentTypeId::from_name("Velocity"));
    }

    #[test]
    fn test_fnv1a_known_vector() {
        // FNV-1a 64-bit of the empty string is the offset basis itself.
        assert_eq!(
            ComponentTypeId::from_name(""),
            ComponentTypeId(0xcbf2_9ce4_8422_2325)
        );
        // FNV-1a 64-bit of "a".
        assert_eq!(
            ComponentTypeId::from_name("a"),
            ComponentTypeId(0xaf63_dc4c_8601_ec8c)
        );
    }

    #[test]
    fn test_descriptor_carries_name_and_type() {
        let descriptor = ComponentDescriptor::of::<Health>();
        assert_eq!(descriptor.name, "Health");
        assert_eq!(descriptor.type_id, Health::component_type_id());
        assert_eq!(descriptor.rust_type, TypeId::of::<Health>());
        assert!(descriptor.json.is_none());
    }
}
