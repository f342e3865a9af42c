//! The "On Query" event node of the visual-scripting layer.
//!
//! Initialising the node defines a query over named component types and a
//! runtime-generated system that polls it every tick. Entities the poll
//! yields are queued and emitted one at a time: the first immediately, the
//! rest spaced by a fixed interval through an [`EntityCursor`] owned by the
//! node's system. Disposing the node disables and unregisters the system
//! (cancelling any cursor in flight) and removes the query. Removing the
//! query on its own also stops emission and drops pending entities.
//!
//! [`EntityCursor`]: crate::timer::EntityCursor

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use engine_component::{EcsError, Entity, Query, QueryDescriptor, World};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Insert, SystemDefinition, SystemUuid};
use crate::error::SchedulerError;
use crate::runner::SystemRunner;
use crate::timer::{EmitFn, EntityQueue};

/// Prefix of the generated system uuids.
pub const SYSTEM_PREFIX: &str = "behave-graph-onQuery";

/// Spacing between two emitted entities.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Which view of the query the node reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryEvent {
    /// Entities that started matching.
    #[default]
    Enter,
    /// Entities that stopped matching.
    Exit,
    /// The full match set, whenever it changes.
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnQueryConfig {
    /// Component names, resolved through the world's registry.
    pub components: Vec<String>,
    #[serde(default)]
    pub event: QueryEvent,
    /// Group or system the node's system runs with.
    #[serde(default)]
    pub anchor: Option<SystemUuid>,
    #[serde(default = "default_interval", with = "millis")]
    pub interval: Duration,
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

impl OnQueryConfig {
    #[must_use]
    pub fn new(components: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            components: components.into_iter().map(Into::into).collect(),
            event: QueryEvent::default(),
            anchor: None,
            interval: DEFAULT_INTERVAL,
        }
    }

    #[must_use]
    pub fn event(mut self, event: QueryEvent) -> Self {
        self.event = event;
        self
    }

    #[must_use]
    pub fn anchor(mut self, anchor: impl Into<SystemUuid>) -> Self {
        self.anchor = Some(anchor.into());
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OnQueryError {
    #[error(transparent)]
    Component(#[from] EcsError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// A live "On Query" node.
#[derive(Debug)]
pub struct OnQuery {
    system: SystemUuid,
    query: Query,
}

impl OnQuery {
    /// Define the node's query and system and start the system.
    ///
    /// `on_entity` is called once per emitted entity.
    ///
    /// # Errors
    ///
    /// [`EcsError::UnknownComponent`] for an unregistered component name, or
    /// a scheduler error from starting the system. Nothing is left behind on
    /// error.
    pub fn init(
        runner: &mut SystemRunner,
        world: &mut World,
        config: OnQueryConfig,
        on_entity: impl FnMut(&mut World, Entity) + 'static,
    ) -> Result<Self, OnQueryError> {
        let descriptor = config
            .components
            .iter()
            .map(|name| {
                world
                    .component_id_by_name(name)
                    .ok_or_else(|| EcsError::UnknownComponent(name.clone()))
            })
            .collect::<Result<QueryDescriptor, _>>()?;

        let query = world.define_query(descriptor);
        let system = runner.generate_uuid(SYSTEM_PREFIX);
        let emit: EmitFn = Rc::new(RefCell::new(on_entity));
        let pending = EntityQueue::new();
        let event = config.event;
        let interval = config.interval;
        let mut last_current: Vec<Entity> = Vec::new();

        let definition = SystemDefinition::new(system.clone()).execute(move |world, ctx| {
            if !world.has_query(query) {
                pending.clear();
                return Ok(());
            }
            let batch = match event {
                QueryEvent::Enter => world.query_enter(query),
                QueryEvent::Exit => world.query_exit(query),
                QueryEvent::Current => {
                    let current = world.query(query);
                    if current == last_current {
                        Vec::new()
                    } else {
                        last_current.clone_from(&current);
                        current
                    }
                }
            };
            pending.extend(batch);
            if let Some(cursor) = pending.start(world, interval, &emit) {
                ctx.schedule(interval, cursor.while_alive(move |world| world.has_query(query)));
            }
            Ok(())
        });

        let started = runner
            .define_system(world, definition)
            .and_then(|uuid| runner.start_system(world, &uuid, config.anchor.map(Insert::with)));
        if let Err(err) = started {
            if runner.registry().contains(&system) {
                let _ = runner.unregister_system(world, &system);
            }
            world.remove_query(query);
            return Err(err.into());
        }

        info!(system = %system, event = ?event, "on-query node initialised");
        Ok(Self { system, query })
    }

    /// The generated system uuid.
    #[must_use]
    pub fn system(&self) -> &SystemUuid {
        &self.system
    }

    #[must_use]
    pub fn query(&self) -> Query {
        self.query
    }

    /// Tear the node down. No entity is emitted afterwards.
    pub fn dispose(self, runner: &mut SystemRunner, world: &mut World) {
        if let Err(err) = runner.unregister_system(world, &self.system) {
            warn!(system = %self.system, error = %err, "on-query system already gone");
        }
        world.remove_query(self.query);
        info!(system = %self.system, "on-query node disposed");
    }
}
