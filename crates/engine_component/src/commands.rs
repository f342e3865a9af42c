//! Deferred world mutations issued from component hooks.
//!
//! [`Component::on_set`] and [`Component::on_remove`] run while their own
//! value is borrowed from storage, so they can not touch the world directly.
//! They push operations into [`Commands`] instead; the world applies the
//! queue in order as soon as the hook returns, still inside the same
//! `set_component` / `remove_component` call.

use std::collections::VecDeque;

use crate::component::Component;
use crate::entity::Entity;
use crate::error::EcsError;
use crate::world::World;

type Command = Box<dyn FnOnce(&mut World) -> Result<(), EcsError>>;

/// An ordered queue of world mutations.
#[derive(Default)]
pub struct Commands {
    queue: VecDeque<Command>,
}

impl Commands {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `World::set_component::<T>(entity, patch)`.
    pub fn set_component<T: Component>(&mut self, entity: Entity, patch: T::Patch) {
        self.push(move |world| world.set_component::<T>(entity, patch));
    }

    /// Queue `World::remove_component::<T>(entity)`.
    pub fn remove_component<T: Component>(&mut self, entity: Entity) {
        self.push(move |world| world.remove_component::<T>(entity).map(|_| ()));
    }

    /// Queue `World::destroy_entity(entity)`.
    pub fn destroy_entity(&mut self, entity: Entity) {
        self.push(move |world| world.destroy_entity(entity));
    }

    /// Queue an arbitrary mutation.
    pub fn push(&mut self, command: impl FnOnce(&mut World) -> Result<(), EcsError> + 'static) {
        self.queue.push_back(Box::new(command));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Run every queued command. All commands run even if one fails; the
    /// first error is returned.
    pub(crate) fn apply(self, world: &mut World) -> Result<(), EcsError> {
        let mut first_error = None;
        for command in self.queue {
            if let Err(err) = command(world) {
                tracing::warn!(error = %err, "queued component command failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("len", &self.queue.len())
            .finish()
    }
}
