//! Errors raised while registering and ordering systems.

use crate::config::SystemUuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// A system with this uuid is already registered.
    #[error("system '{0}' is already registered")]
    DuplicateSystem(SystemUuid),

    /// The requested operation names a system that is not registered.
    #[error("system '{0}' is not registered")]
    UnknownSystem(SystemUuid),

    /// The ordering constraints form a cycle through these systems. The
    /// change that introduced it was rolled back.
    #[error("system ordering cycle through {}", format_cycle(.0))]
    OrderingCycle(Vec<SystemUuid>),
}

fn format_cycle(systems: &[SystemUuid]) -> String {
    systems
        .iter()
        .map(SystemUuid::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
