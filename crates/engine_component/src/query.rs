//! Live queries over entities that hold a set of component types.
//!
//! A [`QueryDescriptor`] lists the component types an entity must hold. Once
//! defined, the world maintains the query incrementally: every set or remove
//! that changes whether an entity matches updates the query's `current` set
//! and appends the entity to its pending-enter or pending-exit buffer.
//! [`World::query_enter`] and [`World::query_exit`] drain those buffers, so
//! each transition is reported exactly once.
//!
//! A query reactor additionally mounts one binding per matching entity.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{Component, ComponentTypeId};
use crate::entity::{Entity, EntityRecord};
use crate::reactor::{BindingKey, BindingOwner, Reactor, ReactorFactory};
use crate::world::World;

/// The component types a query requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    required: Vec<ComponentTypeId>,
}

impl QueryDescriptor {
    /// Create a new empty query descriptor. It matches every entity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require component `T`.
    #[must_use]
    pub fn with<T: Component>(self) -> Self {
        self.with_id(T::component_type_id())
    }

    /// Require the component type with id `type_id`. Duplicates are ignored.
    #[must_use]
    pub fn with_id(mut self, type_id: ComponentTypeId) -> Self {
        if !self.required.contains(&type_id) {
            self.required.push(type_id);
        }
        self
    }

    /// Returns the required component types in declaration order.
    #[must_use]
    pub fn required_types(&self) -> &[ComponentTypeId] {
        &self.required
    }

    /// Returns `true` if `record` holds every required type.
    pub(crate) fn matches(&self, record: &EntityRecord) -> bool {
        record.has_all(&self.required)
    }
}

impl FromIterator<ComponentTypeId> for QueryDescriptor {
    fn from_iter<I: IntoIterator<Item = ComponentTypeId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Self::with_id)
    }
}

/// Internal id of a defined query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub u64);

/// Handle to a defined query. Stays valid (and yields empty results) after
/// the query is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Query {
    id: QueryId,
}

impl Query {
    #[must_use]
    pub fn id(self) -> QueryId {
        self.id
    }
}

struct QueryState {
    descriptor: QueryDescriptor,
    current: IndexSet<Entity>,
    entered: IndexSet<Entity>,
    exited: IndexSet<Entity>,
    reactor: Option<ReactorFactory>,
}

/// All live queries plus an index from component type to the queries that
/// mention it.
#[derive(Default)]
pub(crate) struct QueryEngine {
    next_id: u64,
    queries: HashMap<QueryId, QueryState>,
    /// Per component type, the queries requiring it in definition order.
    by_component: HashMap<ComponentTypeId, Vec<QueryId>>,
    /// Queries with an empty descriptor match on entity creation.
    match_all: Vec<QueryId>,
}

impl QueryEngine {
    /// Register a query and seed it with the entities that already match.
    fn define<'a>(
        &mut self,
        descriptor: QueryDescriptor,
        reactor: Option<ReactorFactory>,
        records: impl Iterator<Item = (Entity, &'a EntityRecord)>,
    ) -> (QueryId, Vec<Entity>) {
        self.next_id += 1;
        let id = QueryId(self.next_id);

        let mut matching: Vec<Entity> = records
            .filter(|(_, record)| !record.despawning && descriptor.matches(record))
            .map(|(entity, _)| entity)
            .collect();
        matching.sort();

        if descriptor.required.is_empty() {
            self.match_all.push(id);
        }
        for type_id in &descriptor.required {
            self.by_component.entry(*type_id).or_default().push(id);
        }
        self.queries.insert(
            id,
            QueryState {
                descriptor,
                current: matching.iter().copied().collect(),
                entered: matching.iter().copied().collect(),
                exited: IndexSet::new(),
                reactor,
            },
        );
        (id, matching)
    }

    fn remove(&mut self, id: QueryId) -> Option<QueryState> {
        let state = self.queries.remove(&id)?;
        for type_id in &state.descriptor.required {
            if let Some(ids) = self.by_component.get_mut(type_id) {
                ids.retain(|&other| other != id);
            }
        }
        self.match_all.retain(|&other| other != id);
        Some(state)
    }

    fn enter(state: &mut QueryState, entity: Entity) -> bool {
        if !state.current.insert(entity) {
            return false;
        }
        // Entered and left again before anyone looked: both are reported.
        state.entered.insert(entity);
        true
    }

    fn exit(state: &mut QueryState, entity: Entity) -> bool {
        if !state.current.shift_remove(&entity) {
            return false;
        }
        state.exited.insert(entity);
        true
    }

    /// Called after `type_id` was attached to `entity`. Returns the reactive
    /// queries the entity entered.
    pub fn on_attach(
        &mut self,
        entity: Entity,
        type_id: ComponentTypeId,
        record: &EntityRecord,
    ) -> Vec<(QueryId, ReactorFactory)> {
        let mut mounted = Vec::new();
        let Some(ids) = self.by_component.get(&type_id) else {
            return mounted;
        };
        for id in ids {
            let Some(state) = self.queries.get_mut(id) else {
                continue;
            };
            if state.descriptor.matches(record) && Self::enter(state, entity) {
                if let Some(factory) = &state.reactor {
                    mounted.push((*id, factory.clone()));
                }
            }
        }
        mounted
    }

    /// Called before `type_id` is detached from `entity`. Returns the
    /// reactive queries the entity left.
    pub fn on_detach(&mut self, entity: Entity, type_id: ComponentTypeId) -> Vec<QueryId> {
        let mut unmounted = Vec::new();
        let Some(ids) = self.by_component.get(&type_id) else {
            return unmounted;
        };
        for id in ids {
            let Some(state) = self.queries.get_mut(id) else {
                continue;
            };
            if Self::exit(state, entity) && state.reactor.is_some() {
                unmounted.push(*id);
            }
        }
        unmounted
    }

    /// Called when an entity is created; only empty descriptors match it.
    pub fn on_create(&mut self, entity: Entity) -> Vec<(QueryId, ReactorFactory)> {
        let mut mounted = Vec::new();
        for id in &self.match_all {
            if let Some(state) = self.queries.get_mut(id)
                && Self::enter(state, entity)
                && let Some(factory) = &state.reactor
            {
                mounted.push((*id, factory.clone()));
            }
        }
        mounted
    }

    /// Called when an entity with no components left is released.
    pub fn on_release(&mut self, entity: Entity) -> Vec<QueryId> {
        let mut unmounted = Vec::new();
        for id in &self.match_all {
            if let Some(state) = self.queries.get_mut(id)
                && Self::exit(state, entity)
                && state.reactor.is_some()
            {
                unmounted.push(*id);
            }
        }
        unmounted
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }
}

impl World {
    /// Define a live query. Entities that already match are reported by the
    /// first [`World::query_enter`].
    pub fn define_query(&mut self, descriptor: QueryDescriptor) -> Query {
        let (id, matching) =
            self.queries
                .define(descriptor, None, self.entities.iter_records());
        debug!(query = id.0, matching = matching.len(), "query defined");
        Query { id }
    }

    /// Define a query whose matching entities each get a binding built from
    /// `factory`. Entities that already match are mounted right away.
    pub fn define_query_reactor(
        &mut self,
        descriptor: QueryDescriptor,
        factory: impl Fn() -> Reactor + 'static,
    ) -> Query {
        let factory: ReactorFactory = std::rc::Rc::new(factory);
        let (id, matching) = self.queries.define(
            descriptor,
            Some(factory.clone()),
            self.entities.iter_records(),
        );
        debug!(query = id.0, matching = matching.len(), "query reactor defined");
        for entity in matching {
            self.mount_binding(
                BindingKey::new(entity, BindingOwner::Query(id)),
                factory(),
            );
        }
        Query { id }
    }

    /// Entities currently matching `query`, in the order they entered.
    #[must_use]
    pub fn query(&self, query: Query) -> Vec<Entity> {
        self.queries
            .queries
            .get(&query.id)
            .map(|state| state.current.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `false` once `query` has been removed.
    #[must_use]
    pub fn has_query(&self, query: Query) -> bool {
        self.queries.queries.contains_key(&query.id)
    }

    /// Entities that started matching since the last call, oldest first.
    pub fn query_enter(&mut self, query: Query) -> Vec<Entity> {
        self.queries
            .queries
            .get_mut(&query.id)
            .map(|state| state.entered.drain(..).collect())
            .unwrap_or_default()
    }

    /// Entities that stopped matching since the last call, oldest first.
    pub fn query_exit(&mut self, query: Query) -> Vec<Entity> {
        self.queries
            .queries
            .get_mut(&query.id)
            .map(|state| state.exited.drain(..).collect())
            .unwrap_or_default()
    }

    /// Unregister `query`, unmounting its per-entity bindings. Returns
    /// `false` if it was already removed.
    pub fn remove_query(&mut self, query: Query) -> bool {
        let Some(state) = self.queries.remove(query.id) else {
            return false;
        };
        if state.reactor.is_some() {
            for entity in state.current {
                self.unmount_binding(BindingKey::new(entity, BindingOwner::Query(query.id)));
            }
        }
        debug!(query = query.id.0, "query removed");
        true
    }

    /// Number of live queries.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub(crate) fn track_insert(&mut self, entity: Entity, type_id: ComponentTypeId) {
        let Some(record) = self.entities.record(entity) else {
            return;
        };
        let entered = self.queries.on_attach(entity, type_id, record);
        for (id, factory) in entered {
            self.mount_binding(BindingKey::new(entity, BindingOwner::Query(id)), factory());
        }
    }

    pub(crate) fn track_remove(&mut self, entity: Entity, type_id: ComponentTypeId) {
        for id in self.queries.on_detach(entity, type_id) {
            self.unmount_binding(BindingKey::new(entity, BindingOwner::Query(id)));
        }
    }

    pub(crate) fn track_create(&mut self, entity: Entity) {
        for (id, factory) in self.queries.on_create(entity) {
            self.mount_binding(BindingKey::new(entity, BindingOwner::Query(id)), factory());
        }
    }

    pub(crate) fn track_release(&mut self, entity: Entity) {
        for id in self.queries.on_release(entity) {
            self.unmount_binding(BindingKey::new(entity, BindingOwner::Query(id)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::commands::Commands;
    use crate::reactor::Cleanup;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Position(f32);

    impl Component for Position {
        type Patch = f32;
        fn type_name() -> &'static str {
            "Position"
        }
        fn on_init(_entity: Entity) -> Self {
            Self(0.0)
        }
        fn on_set(&mut self, _entity: Entity, patch: f32, _commands: &mut Commands) {
            self.0 = patch;
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Velocity(f32);

    impl Component for Velocity {
        type Patch = f32;
        fn type_name() -> &'static str {
            "Velocity"
        }
        fn on_init(_entity: Entity) -> Self {
            Self(0.0)
        }
        fn on_set(&mut self, _entity: Entity, patch: f32, _commands: &mut Commands) {
            self.0 = patch;
        }
    }

    fn moving() -> QueryDescriptor {
        QueryDescriptor::new().with::<Position>().with::<Velocity>()
    }

    #[test]
    fn test_descriptor_ignores_duplicates() {
        let descriptor = QueryDescriptor::new()
            .with::<Position>()
            .with::<Position>()
            .with::<Velocity>();
        assert_eq!(
            descriptor.required_types(),
            &[Position::component_type_id(), Velocity::component_type_id()]
        );
        let collected: QueryDescriptor = descriptor.required_types().iter().copied().collect();
        assert_eq!(collected, descriptor);
    }

    #[test]
    fn test_position_velocity_scenario() {
        let mut world = World::default();
        let q = world.define_query(moving());
        let e = world.create_entity();

        world.set_component::<Position>(e, 1.0).unwrap();
        assert!(world.query_enter(q).is_empty());
        assert!(world.query(q).is_empty());

        world.set_component::<Velocity>(e, 2.0).unwrap();
        assert_eq!(world.query_enter(q), vec![e]);
        assert_eq!(world.query(q), vec![e]);

        // Updates do not re-enter.
        world.set_component::<Velocity>(e, 3.0).unwrap();
        assert!(world.query_enter(q).is_empty());
        assert_eq!(world.query(q), vec![e]);

        world.remove_component::<Velocity>(e).unwrap();
        assert_eq!(world.query_exit(q), vec![e]);
        assert!(world.query(q).is_empty());
        assert!(world.query_exit(q).is_empty());
    }

    #[test]
    fn test_existing_matches_reported_on_first_enter() {
        let mut world = World::default();
        let a = world.create_entity();
        let b = world.create_entity();
        world.set_component::<Position>(b, 0.0).unwrap();
        world.set_component::<Position>(a, 0.0).unwrap();

        let q = world.define_query(QueryDescriptor::new().with::<Position>());
        assert_eq!(world.query(q), vec![a, b]);
        assert_eq!(world.query_enter(q), vec![a, b]);
        assert!(world.query_enter(q).is_empty());
    }

    #[test]
    fn test_query_matches_brute_force_after_interleaving() {
        let mut world = World::default();
        let q = world.define_query(moving());
        let entities: Vec<Entity> = (0..6).map(|_| world.create_entity()).collect();

        for (i, &e) in entities.iter().enumerate() {
            world.set_component::<Position>(e, i as f32).unwrap();
            if i % 2 == 0 {
                world.set_component::<Velocity>(e, 1.0).unwrap();
            }
        }
        world.remove_component::<Position>(entities[2]).unwrap();
        world.set_component::<Velocity>(entities[3], 1.0).unwrap();
        world.destroy_entity(entities[4]).unwrap();
        world.set_component::<Position>(entities[2], 9.0).unwrap();

        let expected: Vec<Entity> = entities
            .iter()
            .copied()
            .filter(|&e| world.has_component::<Position>(e) && world.has_component::<Velocity>(e))
            .collect();
        let mut actual = world.query(q);
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_enter_then_exit_between_polls_reports_both() {
        let mut world = World::default();
        let q = world.define_query(QueryDescriptor::new().with::<Position>());
        let e = world.create_entity();

        world.set_component::<Position>(e, 0.0).unwrap();
        world.remove_component::<Position>(e).unwrap();

        assert_eq!(world.query_enter(q), vec![e]);
        assert_eq!(world.query_exit(q), vec![e]);
        assert!(world.query(q).is_empty());
    }

    #[test]
    fn test_destroy_reports_one_exit_per_query() {
        let mut world = World::default();
        let q1 = world.define_query(moving());
        let q2 = world.define_query(QueryDescriptor::new().with::<Position>());
        let e = world.create_entity();
        world.set_component::<Position>(e, 0.0).unwrap();
        world.set_component::<Velocity>(e, 0.0).unwrap();
        world.query_enter(q1);
        world.query_enter(q2);

        world.destroy_entity(e).unwrap();

        assert_eq!(world.query_exit(q1), vec![e]);
        assert_eq!(world.query_exit(q2), vec![e]);
        assert!(world.query(q1).is_empty());
        assert!(world.query(q2).is_empty());
    }

    #[test]
    fn test_removed_query_polls_empty() {
        let mut world = World::default();
        let q = world.define_query(QueryDescriptor::new().with::<Position>());
        let e = world.create_entity();
        world.set_component::<Position>(e, 0.0).unwrap();

        assert!(world.has_query(q));
        assert!(world.remove_query(q));
        assert!(!world.has_query(q));
        assert!(!world.remove_query(q));
        assert!(world.query(q).is_empty());
        assert!(world.query_enter(q).is_empty());
        assert_eq!(world.query_count(), 0);
    }

    #[test]
    fn test_empty_descriptor_tracks_entity_lifetime() {
        let mut world = World::default();
        let q = world.define_query(QueryDescriptor::new());
        let e = world.create_entity();
        assert_eq!(world.query_enter(q), vec![e]);
        world.destroy_entity(e).unwrap();
        assert_eq!(world.query_exit(q), vec![e]);
    }

    #[test]
    fn test_query_reactor_mounts_per_entity() {
        let mut world = World::default();
        let log: Rc<RefCell<Vec<String>>> = Rc::default();
        let a = world.create_entity();
        world.set_component::<Position>(a, 0.0).unwrap();

        let factory_log = log.clone();
        let q = world.define_query_reactor(QueryDescriptor::new().with::<Position>(), move || {
            let log = factory_log.clone();
            Reactor::new().on_mount(move |_world, entity| {
                log.borrow_mut().push(format!("mount {}", entity.id()));
                let log = log.clone();
                Ok(Cleanup::new(move |_world| {
                    log.borrow_mut().push(format!("unmount {}", entity.id()));
                }))
            })
        });

        let b = world.create_entity();
        world.set_component::<Position>(b, 0.0).unwrap();
        world.remove_component::<Position>(a).unwrap();
        world.remove_query(q);

        assert_eq!(
            *log.borrow(),
            vec!["mount 1", "mount 2", "unmount 1", "unmount 2"]
        );
        assert_eq!(world.binding_count(), 0);
    }
}
