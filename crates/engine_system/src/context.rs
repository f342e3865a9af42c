//! Per-tick execution context provided to system functions.

use std::time::Duration;

use crate::config::SystemUuid;
use crate::timer::Task;

/// Context provided to a system function on each tick.
///
/// Carries tick metadata and collects the deferred work the system wants to
/// schedule. Scheduled tasks are owned by the system and are cancelled when
/// it is disabled.
pub struct SystemContext {
    /// The current tick ID.
    pub tick_id: u64,
    /// Delta time since the last tick, in seconds.
    pub dt: f64,
    /// Runner clock at the start of this tick.
    pub elapsed: Duration,
    uuid: SystemUuid,
    scheduled: Vec<(Duration, Box<dyn Task>)>,
}

impl SystemContext {
    /// Create a new context for a tick.
    #[must_use]
    pub fn new(tick_id: u64, dt: f64, elapsed: Duration, uuid: SystemUuid) -> Self {
        Self {
            tick_id,
            dt,
            elapsed,
            uuid,
            scheduled: Vec::new(),
        }
    }

    /// The system being executed.
    #[must_use]
    pub fn uuid(&self) -> &SystemUuid {
        &self.uuid
    }

    /// Run `task` once `delay` has passed on the runner clock.
    pub fn schedule(&mut self, delay: Duration, task: impl Task + 'static) {
        self.scheduled.push((delay, Box::new(task)));
    }

    pub(crate) fn take_scheduled(&mut self) -> Vec<(Duration, Box<dyn Task>)> {
        std::mem::take(&mut self.scheduled)
    }
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("tick_id", &self.tick_id)
            .field("dt", &self.dt)
            .field("elapsed", &self.elapsed)
            .field("uuid", &self.uuid)
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use engine_component::World;

    use super::*;
    use crate::timer::Step;

    #[test]
    fn test_context_creation() {
        let ctx = SystemContext::new(1, 0.016, Duration::from_millis(16), "physics".into());
        assert_eq!(ctx.tick_id, 1);
        assert!((ctx.dt - 0.016).abs() < f64::EPSILON);
        assert_eq!(ctx.uuid().as_str(), "physics");
    }

    #[test]
    fn test_schedule_collects_tasks() {
        let mut ctx = SystemContext::new(1, 0.016, Duration::ZERO, "physics".into());
        ctx.schedule(Duration::from_millis(5), |_world: &mut World| Step::Done);
        let scheduled = ctx.take_scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, Duration::from_millis(5));
        assert!(ctx.take_scheduled().is_empty());
    }
}
