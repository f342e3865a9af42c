//! System definitions.

use std::rc::Rc;

use engine_component::{Reactor, ReactorFactory, World};
use serde::{Deserialize, Serialize};

use crate::context::SystemContext;

/// The unique, human-readable id of a system (e.g. `"physics"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemUuid(String);

impl SystemUuid {
    #[must_use]
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SystemUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SystemUuid {
    fn from(uuid: &str) -> Self {
        Self::new(uuid)
    }
}

impl From<String> for SystemUuid {
    fn from(uuid: String) -> Self {
        Self(uuid)
    }
}

/// Where a system sits relative to others.
///
/// - `after: X` runs the system once X and everything inside X are done.
/// - `before: X` runs the system before X starts.
/// - `with: G` runs the system inside G: after G's own execute, before
///   anything ordered after G. Members are skipped while G is disabled.
///
/// Anchors that are not registered yet have no effect until they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insert {
    pub before: Option<SystemUuid>,
    pub after: Option<SystemUuid>,
    pub with: Option<SystemUuid>,
}

impl Insert {
    #[must_use]
    pub fn before(anchor: impl Into<SystemUuid>) -> Self {
        Self {
            before: Some(anchor.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn after(anchor: impl Into<SystemUuid>) -> Self {
        Self {
            after: Some(anchor.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with(group: impl Into<SystemUuid>) -> Self {
        Self {
            with: Some(group.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if no constraint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.before.is_none() && self.after.is_none() && self.with.is_none()
    }

    /// The anchors this constraint mentions.
    pub fn anchors(&self) -> impl Iterator<Item = &SystemUuid> {
        [&self.before, &self.after, &self.with]
            .into_iter()
            .filter_map(Option::as_ref)
    }
}

/// Per-tick logic of a system. An error disables the system.
pub type ExecuteFn = Box<dyn FnMut(&mut World, &mut SystemContext) -> anyhow::Result<()>>;

/// Everything needed to register a system.
///
/// ```rust
/// use engine_system::{Insert, SystemDefinition};
///
/// let definition = SystemDefinition::new("movement")
///     .after("input")
///     .execute(|_world, ctx| {
///         tracing::debug!(tick = ctx.tick_id, "moving");
///         Ok(())
///     });
/// assert_eq!(definition.insert, Insert::after("input"));
/// ```
pub struct SystemDefinition {
    pub uuid: SystemUuid,
    pub insert: Insert,
    pub(crate) execute: Option<ExecuteFn>,
    pub(crate) reactor: Option<ReactorFactory>,
}

impl SystemDefinition {
    #[must_use]
    pub fn new(uuid: impl Into<SystemUuid>) -> Self {
        Self {
            uuid: uuid.into(),
            insert: Insert::default(),
            execute: None,
            reactor: None,
        }
    }

    #[must_use]
    pub fn execute(
        mut self,
        execute: impl FnMut(&mut World, &mut SystemContext) -> anyhow::Result<()> + 'static,
    ) -> Self {
        self.execute = Some(Box::new(execute));
        self
    }

    /// A reactor mounted while the system is enabled. `factory` is called
    /// once per start.
    #[must_use]
    pub fn reactor(mut self, factory: impl Fn() -> Reactor + 'static) -> Self {
        self.reactor = Some(Rc::new(factory));
        self
    }

    #[must_use]
    pub fn insert(mut self, insert: Insert) -> Self {
        self.insert = insert;
        self
    }

    #[must_use]
    pub fn before(mut self, anchor: impl Into<SystemUuid>) -> Self {
        self.insert.before = Some(anchor.into());
        self
    }

    #[must_use]
    pub fn after(mut self, anchor: impl Into<SystemUuid>) -> Self {
        self.insert.after = Some(anchor.into());
        self
    }

    #[must_use]
    pub fn with(mut self, group: impl Into<SystemUuid>) -> Self {
        self.insert.with = Some(group.into());
        self
    }
}

impl std::fmt::Debug for SystemDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDefinition")
            .field("uuid", &self.uuid)
            .field("insert", &self.insert)
            .field("execute", &self.execute.is_some())
            .field("reactor", &self.reactor.is_some())
            .finish()
    }
}
