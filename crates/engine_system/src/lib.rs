//! # engine_system
//!
//! Systems for the engine ECS: registration, ordering, the tick runner and
//! the "On Query" event node.
//!
//! A system is a uuid, an optional execute function and an optional
//! reactor, placed relative to other systems with [`Insert`] constraints
//! (`before`, `after`, `with`). The [`SystemRunner`] resolves the order
//! whenever the set of systems changes and executes every enabled system
//! once per tick. Deferred work goes through the [`TimerQueue`] and is
//! owned by the system that scheduled it.
//!
//! ## Usage
//!
//! ```rust
//! use engine_component::World;
//! use engine_system::{SystemDefinition, SystemRunner};
//!
//! let mut world = World::default();
//! let mut runner = SystemRunner::new();
//!
//! runner
//!     .define_system(&mut world, SystemDefinition::new("input"))
//!     .unwrap();
//! runner
//!     .define_system(
//!         &mut world,
//!         SystemDefinition::new("movement")
//!             .after("input")
//!             .execute(|_world, _ctx| Ok(())),
//!     )
//!     .unwrap();
//!
//! // "input" has no constraints and waits to be started.
//! let report = runner.tick(&mut world, 1.0 / 60.0);
//! assert_eq!(report.executed.len(), 1);
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod on_query;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod timer;

pub use config::{ExecuteFn, Insert, SystemDefinition, SystemUuid};
pub use context::SystemContext;
pub use error::SchedulerError;
pub use on_query::{OnQuery, OnQueryConfig, OnQueryError, QueryEvent};
pub use registry::SystemRegistry;
pub use runner::{SystemFailure, SystemRunner, TickReport};
pub use timer::{EmitFn, EntityCursor, EntityQueue, Step, Task, TimerQueue};
