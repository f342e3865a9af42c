//! # engine_component
//!
//! The "E" and "C" in ECS: entities, components, and everything derived
//! from them.
//!
//! This crate provides:
//!
//! - [`Component`] trait: default state, patch merging and removal hooks,
//!   plus an optional [`Reactor`].
//! - [`World`]: entity registry, per-type component storage and the UUID
//!   table, with deferred [`Commands`] for hooks.
//! - [`QueryDescriptor`] / [`Query`]: incrementally maintained queries with
//!   drain-once enter and exit buffers.
//! - [`Reactor`] / [`Effect`] / [`Cleanup`]: reactive bindings whose cleanup
//!   always runs before storage is freed or the effect runs again.
//! - [`WorldSnapshot`] and the MessagePack [`codec`].

pub mod codec;
pub mod commands;
pub mod component;
pub mod entity;
pub mod error;
pub mod query;
pub mod reactor;
pub mod snapshot;
pub mod storage;
pub mod uuid_table;
pub mod world;

pub use commands::Commands;
pub use component::{Component, ComponentTypeId, JsonComponent};
pub use entity::{Entity, EntityAllocator};
pub use error::EcsError;
pub use query::{Query, QueryDescriptor, QueryId};
pub use reactor::{
    BindingKey, BindingOwner, BoxError, Cleanup, Deps, Effect, MAX_REACTOR_DEPTH, Reactor,
    ReactorFactory, ReactorFault, ReactorPhase,
};
pub use snapshot::{EntitySnapshot, WorldSnapshot};
pub use storage::Column;
pub use uuid_table::{EntityUuid, UuidTable};
pub use world::{World, WorldConfig};
