//! Error types for entity and component operations.

use crate::entity::Entity;
use crate::uuid_table::EntityUuid;

/// Errors raised by the [`World`](crate::World).
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (never created, or already destroyed).
    #[error("{0} not found")]
    EntityNotFound(Entity),

    /// No entity is registered under this UUID.
    #[error("no entity with uuid {0}")]
    UuidNotFound(EntityUuid),

    /// The UUID is already assigned to another entity.
    #[error("uuid {uuid} already belongs to {owner}")]
    DuplicateUuid {
        /// The contested UUID.
        uuid: EntityUuid,
        /// The entity currently holding it.
        owner: Entity,
    },

    /// A required component is not attached.
    #[error("component '{component}' missing on {entity}")]
    MissingComponent {
        /// The entity that was queried.
        entity: Entity,
        /// Name of the missing component type.
        component: &'static str,
    },

    /// Two different Rust types were registered under the same name.
    #[error("component name '{0}' is already registered by another type")]
    DuplicateComponent(String),

    /// No component type is registered under this name.
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    /// The component type exists but has no JSON contract.
    #[error("component '{0}' is not serialisable")]
    NotSerialisable(String),

    /// A JSON payload could not be turned into a component patch.
    #[error("invalid json for component '{component}': {source}")]
    Json {
        /// Name of the target component type.
        component: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A snapshot could not be encoded to MessagePack.
    #[error("snapshot encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack bytes did not describe a snapshot.
    #[error("snapshot decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
