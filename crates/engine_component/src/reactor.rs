//! Reactive bindings: setup/cleanup side effects tied to entity lifetime.
//!
//! A [`Reactor`] is an ordered list of [`Effect`]s. Mounting a reactor under a
//! [`BindingKey`] runs every effect's setup; each setup returns a [`Cleanup`]
//! that is guaranteed to run exactly once, before the binding is unmounted or
//! the effect is set up again.
//!
//! ```text
//!            mount / dependency change
//! Unmounted ─────────────────────────────▶ Mounted
//!     ▲                                       │
//!     └───────────── cleanup ─────────────────┘
//!          unmount / dependency change
//! ```
//!
//! Dependencies are explicit: an effect may declare a function that reads the
//! world and returns a list of JSON values. Whenever a mutation touches the
//! binding's entity the list is recomputed; if it differs from the one seen
//! at the last setup the effect is cleaned up and set up again. Effects
//! without dependencies run once per mount.
//!
//! Errors never corrupt the state machine: a failed setup still counts as
//! mounted (its cleanup slot is empty) and a failed cleanup still counts as
//! unmounted. Both are logged and kept as [`ReactorFault`]s.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, error, warn};

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::query::QueryId;
use crate::world::World;

/// Error type returned by setup and cleanup functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Declared dependency values of one effect.
pub type Deps = Vec<Value>;

/// Builds a fresh [`Reactor`] for every mount.
pub type ReactorFactory = Rc<dyn Fn() -> Reactor>;

type SetupFn = Box<dyn FnMut(&mut World, Entity) -> Result<Cleanup, BoxError>>;
type DepsFn = Box<dyn Fn(&World, Entity) -> Deps>;
type CleanupFn = Box<dyn FnOnce(&mut World) -> Result<(), BoxError>>;

/// Nested dependency re-checks deeper than this are dropped and reported.
pub const MAX_REACTOR_DEPTH: u32 = 32;

/// The teardown half of an effect.
pub struct Cleanup(Option<CleanupFn>);

impl Cleanup {
    /// A cleanup that does nothing.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(cleanup: impl FnOnce(&mut World) + 'static) -> Self {
        Self(Some(Box::new(move |world| {
            cleanup(world);
            Ok(())
        })))
    }

    pub fn fallible(cleanup: impl FnOnce(&mut World) -> Result<(), BoxError> + 'static) -> Self {
        Self(Some(Box::new(cleanup)))
    }

    fn run(self, world: &mut World) -> Result<(), BoxError> {
        match self.0 {
            Some(cleanup) => cleanup(world),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Cleanup").field(&self.0.is_some()).finish()
    }
}

/// One setup function plus its optional dependency declaration.
pub struct Effect {
    setup: SetupFn,
    deps: Option<DepsFn>,
}

impl Effect {
    /// An effect that is set up once per mount.
    pub fn new(
        setup: impl FnMut(&mut World, Entity) -> Result<Cleanup, BoxError> + 'static,
    ) -> Self {
        Self {
            setup: Box::new(setup),
            deps: None,
        }
    }

    /// Re-run the effect whenever `deps` returns a different list.
    #[must_use]
    pub fn with_deps(mut self, deps: impl Fn(&World, Entity) -> Deps + 'static) -> Self {
        self.deps = Some(Box::new(deps));
        self
    }
}

/// An ordered set of effects mounted together.
#[derive(Default)]
pub struct Reactor {
    effects: Vec<Effect>,
}

impl Reactor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an effect. Effects are set up in the order they were added.
    #[must_use]
    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Shorthand for a dependency-free effect.
    #[must_use]
    pub fn on_mount(
        self,
        setup: impl FnMut(&mut World, Entity) -> Result<Cleanup, BoxError> + 'static,
    ) -> Self {
        self.effect(Effect::new(setup))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("effects", &self.effects.len())
            .finish()
    }
}

/// What a binding is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BindingOwner {
    /// The reactor of a component type.
    Component(ComponentTypeId),
    /// The per-entity reactor of a query reactor.
    Query(QueryId),
    /// The reactor of a system, keyed by the runner's numeric system id.
    System(u64),
}

/// Identifies one binding: an owner on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub entity: Entity,
    pub owner: BindingOwner,
}

impl BindingKey {
    #[must_use]
    pub const fn new(entity: Entity, owner: BindingOwner) -> Self {
        Self { entity, owner }
    }

    #[must_use]
    pub const fn component(entity: Entity, type_id: ComponentTypeId) -> Self {
        Self::new(entity, BindingOwner::Component(type_id))
    }

    /// Key of a system reactor; such bindings belong to no entity.
    #[must_use]
    pub const fn system(system_id: u64) -> Self {
        Self::new(Entity::INVALID, BindingOwner::System(system_id))
    }

    const fn first(entity: Entity) -> Self {
        Self::new(entity, BindingOwner::Component(ComponentTypeId(0)))
    }

    const fn last(entity: Entity) -> Self {
        Self::new(entity, BindingOwner::System(u64::MAX))
    }
}

/// Where a reactor failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorPhase {
    Setup,
    Cleanup,
    /// A dependency re-check was dropped because nesting got too deep.
    DependencyLimit,
}

/// A failed setup or cleanup, reported to the host.
#[derive(Debug)]
pub struct ReactorFault {
    pub key: BindingKey,
    pub phase: ReactorPhase,
    pub error: BoxError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MountState {
    Unmounted,
    Mounted,
}

struct Slot {
    /// `None` while the setup is running.
    setup: Option<SetupFn>,
    /// `None` while the dependency function is being evaluated.
    deps: Option<DepsFn>,
    has_deps: bool,
    last_deps: Option<Deps>,
    cleanup: Option<Cleanup>,
    state: MountState,
}

struct Binding {
    /// Distinguishes a binding from a later one mounted under the same key.
    epoch: u64,
    slots: Vec<Slot>,
}

/// Storage for every mounted binding.
#[derive(Default)]
pub(crate) struct BindingTable {
    bindings: BTreeMap<BindingKey, Binding>,
    next_epoch: u64,
    depth: u32,
    faults: Vec<ReactorFault>,
}

impl BindingTable {
    fn slot_mut(&mut self, key: &BindingKey, epoch: u64, index: usize) -> Option<&mut Slot> {
        self.bindings
            .get_mut(key)
            .filter(|binding| binding.epoch == epoch)
            .and_then(|binding| binding.slots.get_mut(index))
    }

    fn keys_for(&self, entity: Entity) -> Vec<BindingKey> {
        self.bindings
            .range(BindingKey::first(entity)..=BindingKey::last(entity))
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

impl World {
    /// Mount `reactor` under `key`, running every effect's setup in order.
    ///
    /// A binding already mounted under the same key is unmounted first.
    pub fn mount_binding(&mut self, key: BindingKey, reactor: Reactor) {
        if self.bindings.bindings.contains_key(&key) {
            self.unmount_binding(key);
        }

        let epoch = self.bindings.next_epoch;
        self.bindings.next_epoch += 1;
        let slots: Vec<Slot> = reactor
            .effects
            .into_iter()
            .map(|effect| Slot {
                has_deps: effect.deps.is_some(),
                setup: Some(effect.setup),
                deps: effect.deps,
                last_deps: None,
                cleanup: None,
                state: MountState::Unmounted,
            })
            .collect();
        let count = slots.len();
        self.bindings.bindings.insert(key, Binding { epoch, slots });
        debug!(entity = %key.entity, owner = ?key.owner, effects = count, "binding mounted");

        for index in 0..count {
            self.run_setup(key, epoch, index);
        }
    }

    /// Unmount the binding under `key`, running the cleanup of every mounted
    /// effect. Returns `false` if nothing was mounted.
    pub fn unmount_binding(&mut self, key: BindingKey) -> bool {
        // Removing first makes re-entrant unmounts of the same key no-ops.
        let Some(binding) = self.bindings.bindings.remove(&key) else {
            return false;
        };
        for slot in binding.slots {
            if slot.state != MountState::Mounted {
                continue;
            }
            if let Some(cleanup) = slot.cleanup
                && let Err(err) = cleanup.run(self)
            {
                self.report_fault(key, ReactorPhase::Cleanup, err);
            }
        }
        debug!(entity = %key.entity, owner = ?key.owner, "binding unmounted");
        true
    }

    /// Returns `true` if a binding is mounted under `key`.
    #[must_use]
    pub fn is_mounted(&self, key: BindingKey) -> bool {
        self.bindings.bindings.contains_key(&key)
    }

    /// Number of mounted bindings.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Re-check the declared dependencies of every binding on `entity`.
    ///
    /// Use [`Entity::INVALID`] for bindings that belong to no entity.
    pub fn refresh_bindings(&mut self, entity: Entity) {
        if self.bindings.depth >= MAX_REACTOR_DEPTH {
            warn!(%entity, depth = self.bindings.depth, "reactor re-check depth exceeded");
            let keys = self.bindings.keys_for(entity);
            if let Some(&key) = keys.first() {
                self.report_fault(
                    key,
                    ReactorPhase::DependencyLimit,
                    format!("dependency re-check nested deeper than {MAX_REACTOR_DEPTH}").into(),
                );
            }
            return;
        }

        self.bindings.depth += 1;
        for key in self.bindings.keys_for(entity) {
            self.recheck_binding(key);
        }
        self.bindings.depth -= 1;
    }

    /// Take every fault reported since the last call.
    pub fn drain_faults(&mut self) -> Vec<ReactorFault> {
        std::mem::take(&mut self.bindings.faults)
    }

    /// Unmount every binding attached to `entity`.
    pub(crate) fn unmount_entity_bindings(&mut self, entity: Entity) {
        for key in self.bindings.keys_for(entity) {
            self.unmount_binding(key);
        }
    }

    fn recheck_binding(&mut self, key: BindingKey) {
        let Some(binding) = self.bindings.bindings.get(&key) else {
            return;
        };
        let epoch = binding.epoch;
        let count = binding.slots.len();

        for index in 0..count {
            let Some(slot) = self.bindings.slot_mut(&key, epoch, index) else {
                return;
            };
            // Skip effects without dependencies, unmounted effects, and
            // effects whose setup is on the stack right now.
            if !slot.has_deps || slot.state != MountState::Mounted || slot.setup.is_none() {
                continue;
            }
            let Some(deps_fn) = slot.deps.take() else {
                continue;
            };

            let current = deps_fn(self, key.entity);

            let Some(slot) = self.bindings.slot_mut(&key, epoch, index) else {
                return;
            };
            slot.deps = Some(deps_fn);
            if slot.last_deps.as_ref() == Some(&current) {
                continue;
            }

            let cleanup = slot.cleanup.take();
            slot.state = MountState::Unmounted;
            debug!(entity = %key.entity, owner = ?key.owner, effect = index, "dependencies changed");
            if let Some(cleanup) = cleanup
                && let Err(err) = cleanup.run(self)
            {
                self.report_fault(key, ReactorPhase::Cleanup, err);
            }
            self.run_setup(key, epoch, index);
        }
    }

    fn run_setup(&mut self, key: BindingKey, epoch: u64, index: usize) {
        let Some(slot) = self.bindings.slot_mut(&key, epoch, index) else {
            return;
        };
        let deps_fn = slot.deps.take();
        let deps = deps_fn.as_ref().map(|deps| deps(self, key.entity));

        let Some(slot) = self.bindings.slot_mut(&key, epoch, index) else {
            return;
        };
        slot.deps = deps_fn;
        slot.last_deps = deps;
        let Some(mut setup) = slot.setup.take() else {
            return;
        };
        // Marked before running so an unmount issued from inside the setup
        // still sees this effect as mounted.
        slot.state = MountState::Mounted;

        let result = setup(self, key.entity);

        match self.bindings.slot_mut(&key, epoch, index) {
            Some(slot) => {
                slot.setup = Some(setup);
                match result {
                    Ok(cleanup) => slot.cleanup = Some(cleanup),
                    Err(err) => self.report_fault(key, ReactorPhase::Setup, err),
                }
            }
            // Unmounted while the setup ran: release what it acquired now.
            None => match result {
                Ok(cleanup) => {
                    if let Err(err) = cleanup.run(self) {
                        self.report_fault(key, ReactorPhase::Cleanup, err);
                    }
                }
                Err(err) => self.report_fault(key, ReactorPhase::Setup, err),
            },
        }
    }

    fn report_fault(&mut self, key: BindingKey, phase: ReactorPhase, error: BoxError) {
        error!(entity = %key.entity, owner = ?key.owner, ?phase, %error, "reactor fault");
        self.bindings.faults.push(ReactorFault { key, phase, error });
    }
}
