//! System runner: the per-tick harness around the registry.
//!
//! A tick advances the runner clock, steps due timers, executes every
//! enabled system in resolved order, then re-checks the dependencies of
//! system-level reactive bindings.

use std::time::Duration;

use engine_component::{BindingKey, Entity, World};
use tracing::{debug, error, info};

use crate::config::{Insert, SystemDefinition, SystemUuid};
use crate::context::SystemContext;
use crate::error::SchedulerError;
use crate::registry::SystemRegistry;
use crate::timer::{Task, TimerQueue};

/// A system whose execute returned an error. The system has been disabled.
#[derive(Debug)]
pub struct SystemFailure {
    pub system: SystemUuid,
    pub error: anyhow::Error,
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub tick_id: u64,
    /// Systems whose execute ran, in order.
    pub executed: Vec<SystemUuid>,
    pub failures: Vec<SystemFailure>,
    /// Timer steps taken before the systems ran.
    pub timers_run: usize,
}

impl TickReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns the system registry, the timer queue and the runner clock.
#[derive(Debug, Default)]
pub struct SystemRunner {
    registry: SystemRegistry,
    timers: TimerQueue,
    tick_id: u64,
    elapsed: Duration,
}

impl SystemRunner {
    /// Create a new system runner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system. A definition with insert constraints is enabled
    /// (and its reactor mounted) right away; otherwise it waits for
    /// [`SystemRunner::start_system`].
    ///
    /// # Errors
    ///
    /// [`SchedulerError::DuplicateSystem`] or
    /// [`SchedulerError::OrderingCycle`]; nothing is registered on error.
    pub fn define_system(
        &mut self,
        world: &mut World,
        definition: SystemDefinition,
    ) -> Result<SystemUuid, SchedulerError> {
        let uuid = definition.uuid.clone();
        self.registry.register(definition)?;
        if self.registry.is_enabled(&uuid) {
            self.mount_reactor(world, &uuid);
        }
        Ok(uuid)
    }

    /// Enable `uuid`, optionally re-anchoring it first. Without new
    /// constraints the system keeps its previous position.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownSystem`], or [`SchedulerError::OrderingCycle`]
    /// if `insert` would create a cycle (the system stays as it was).
    pub fn start_system(
        &mut self,
        world: &mut World,
        uuid: &SystemUuid,
        insert: Option<Insert>,
    ) -> Result<(), SchedulerError> {
        if !self.registry.contains(uuid) {
            return Err(SchedulerError::UnknownSystem(uuid.clone()));
        }
        if let Some(insert) = insert {
            self.registry.set_insert(uuid, insert)?;
        }
        let Some(entry) = self.registry.get_mut(uuid) else {
            return Err(SchedulerError::UnknownSystem(uuid.clone()));
        };
        if entry.enabled {
            return Ok(());
        }
        entry.enabled = true;
        info!(system = %uuid, "system started");
        self.mount_reactor(world, uuid);
        Ok(())
    }

    /// Stop running `uuid`: it is skipped from the next tick on, its reactor
    /// is unmounted and its timers are cancelled. It stays registered.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownSystem`].
    pub fn disable_system(
        &mut self,
        world: &mut World,
        uuid: &SystemUuid,
    ) -> Result<(), SchedulerError> {
        let entry = self
            .registry
            .get_mut(uuid)
            .ok_or_else(|| SchedulerError::UnknownSystem(uuid.clone()))?;
        if !entry.enabled {
            return Ok(());
        }
        entry.enabled = false;
        let id = entry.id;
        world.unmount_binding(BindingKey::system(id));
        self.timers.cancel_owner(uuid);
        info!(system = %uuid, "system disabled");
        Ok(())
    }

    /// Disable and forget `uuid`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::UnknownSystem`].
    pub fn unregister_system(
        &mut self,
        world: &mut World,
        uuid: &SystemUuid,
    ) -> Result<(), SchedulerError> {
        self.disable_system(world, uuid)?;
        self.registry.remove(uuid);
        Ok(())
    }

    /// A fresh, unused system uuid for runtime-created systems.
    pub fn generate_uuid(&mut self, prefix: &str) -> SystemUuid {
        self.registry.generate_uuid(prefix)
    }

    /// Schedule `task` for `owner`, `delay` from now.
    pub fn schedule(&mut self, owner: SystemUuid, delay: Duration, task: impl Task + 'static) {
        self.timers
            .schedule(owner, self.elapsed + delay, Box::new(task));
    }

    #[must_use]
    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    #[must_use]
    pub fn is_enabled(&self, uuid: &SystemUuid) -> bool {
        self.registry.is_enabled(uuid)
    }

    /// Number of ticks run so far.
    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    /// Runner clock: the sum of all `dt` passed to [`SystemRunner::tick`].
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Run one tick. `dt` is in seconds; negative, NaN or out-of-range
    /// values count as zero, both for the clock and for the systems.
    pub fn tick(&mut self, world: &mut World, dt: f64) -> TickReport {
        self.tick_id += 1;
        let step = Duration::try_from_secs_f64(dt).unwrap_or(Duration::ZERO);
        let dt = step.as_secs_f64();
        self.elapsed += step;

        let mut report = TickReport {
            tick_id: self.tick_id,
            timers_run: self.timers.run_due(self.elapsed, world),
            ..TickReport::default()
        };

        for uuid in self.registry.active_order() {
            // A system (or group) disabled earlier in this tick is skipped.
            if !self.registry.is_active(&uuid) {
                continue;
            }
            let Some(entry) = self.registry.get_mut(&uuid) else {
                continue;
            };
            let Some(mut execute) = entry.execute.take() else {
                continue;
            };

            let mut ctx = SystemContext::new(self.tick_id, dt, self.elapsed, uuid.clone());
            let result = execute(world, &mut ctx);

            if let Some(entry) = self.registry.get_mut(&uuid) {
                entry.execute = Some(execute);
            }
            report.executed.push(uuid.clone());

            match result {
                Ok(()) => {
                    for (delay, task) in ctx.take_scheduled() {
                        self.timers.schedule(uuid.clone(), self.elapsed + delay, task);
                    }
                }
                Err(err) => {
                    error!(tick_id = self.tick_id, system = %uuid, error = %err, "system failed; disabling");
                    // The system is known to exist here.
                    let _ = self.disable_system(world, &uuid);
                    report.failures.push(SystemFailure {
                        system: uuid,
                        error: err,
                    });
                }
            }
        }

        world.refresh_bindings(Entity::INVALID);

        debug!(
            tick_id = self.tick_id,
            dt,
            executed = report.executed.len(),
            timers = report.timers_run,
            "tick complete"
        );
        report
    }

    fn mount_reactor(&mut self, world: &mut World, uuid: &SystemUuid) {
        let Some(entry) = self.registry.get(uuid) else {
            return;
        };
        if let Some(factory) = &entry.reactor {
            let reactor = factory();
            world.mount_binding(BindingKey::system(entry.id), reactor);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use engine_component::{Cleanup, Reactor};

    use super::*;
    use crate::timer::Step;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging(name: &'static str, log: &Log) -> SystemDefinition {
        let log = log.clone();
        SystemDefinition::new(name).execute(move |_world, _ctx| {
            log.borrow_mut().push(name.to_string());
            Ok(())
        })
    }

    fn start(runner: &mut SystemRunner, world: &mut World, name: &str) {
        runner.start_system(world, &name.into(), None).unwrap();
    }

    #[test]
    fn test_unstarted_system_does_not_run() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();

        runner.define_system(&mut world, logging("idle", &log)).unwrap();
        let report = runner.tick(&mut world, 0.016);
        assert!(report.executed.is_empty());

        start(&mut runner, &mut world, "idle");
        runner.tick(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["idle"]);
        assert_eq!(runner.tick_id(), 2);
    }

    #[test]
    fn test_members_skip_while_group_disabled() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();

        runner.define_system(&mut world, logging("group", &log)).unwrap();
        start(&mut runner, &mut world, "group");
        runner
            .define_system(&mut world, logging("member", &log).with("group"))
            .unwrap();

        runner.disable_system(&mut world, &"group".into()).unwrap();
        let report = runner.tick(&mut world, 0.016);
        assert!(report.executed.is_empty());
        assert!(runner.is_enabled(&"member".into()));

        start(&mut runner, &mut world, "group");
        runner.tick(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["group", "member"]);
    }

    #[test]
    fn test_invalid_dt_counts_as_zero() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let seen: Rc<RefCell<Vec<f64>>> = Rc::default();

        let sink = seen.clone();
        runner
            .define_system(
                &mut world,
                SystemDefinition::new("integrator").after("clock").execute(move |_world, ctx| {
                    sink.borrow_mut().push(ctx.dt);
                    Ok(())
                }),
            )
            .unwrap();

        runner.tick(&mut world, f64::NAN);
        runner.tick(&mut world, -1.0);
        runner.tick(&mut world, 0.5);
        assert_eq!(*seen.borrow(), vec![0.0, 0.0, 0.5]);
        assert_eq!(runner.elapsed(), Duration::from_millis(500));
    }

    #[test]
    fn test_after_constraint_on_later_system() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();

        runner
            .define_system(&mut world, logging("a", &log).after("b"))
            .unwrap();
        runner.define_system(&mut world, logging("b", &log)).unwrap();
        start(&mut runner, &mut world, "b");

        runner.tick(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn test_disable_skips_and_restart_restores_position() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();

        for name in ["first", "middle", "last"] {
            runner.define_system(&mut world, logging(name, &log)).unwrap();
            start(&mut runner, &mut world, name);
        }

        runner.disable_system(&mut world, &"middle".into()).unwrap();
        runner.tick(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["first", "last"]);

        log.borrow_mut().clear();
        start(&mut runner, &mut world, "middle");
        runner.tick(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["first", "middle", "last"]);
    }

    #[test]
    fn test_failing_system_is_disabled() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();
        let calls = Rc::new(Cell::new(0));

        let counter = calls.clone();
        runner
            .define_system(
                &mut world,
                SystemDefinition::new("broken")
                    .before("healthy")
                    .execute(move |_world, _ctx| {
                        counter.set(counter.get() + 1);
                        anyhow::bail!("lost device")
                    }),
            )
            .unwrap();
        runner.define_system(&mut world, logging("healthy", &log)).unwrap();
        start(&mut runner, &mut world, "healthy");

        let report = runner.tick(&mut world, 0.016);
        assert!(!report.is_ok());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].system.as_str(), "broken");
        assert_eq!(*log.borrow(), vec!["healthy"]);
        assert!(!runner.is_enabled(&"broken".into()));

        runner.tick(&mut world, 0.016);
        assert_eq!(calls.get(), 1);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_cycle_on_start_leaves_system_untouched() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();

        runner
            .define_system(&mut world, logging("a", &log).after("b"))
            .unwrap();
        runner.define_system(&mut world, logging("b", &log)).unwrap();

        let err = runner
            .start_system(&mut world, &"b".into(), Some(Insert::after("a")))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::OrderingCycle(_)));
        assert!(!runner.is_enabled(&"b".into()));
        assert_eq!(
            runner.start_system(&mut world, &"nope".into(), None),
            Err(SchedulerError::UnknownSystem("nope".into()))
        );
    }

    #[test]
    fn test_system_reactor_follows_enable_state() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let log: Log = Rc::default();

        let reactor_log = log.clone();
        runner
            .define_system(
                &mut world,
                SystemDefinition::new("materials").reactor(move || {
                    let log = reactor_log.clone();
                    Reactor::new().on_mount(move |_world, _entity| {
                        log.borrow_mut().push("mount".into());
                        let log = log.clone();
                        Ok(Cleanup::new(move |_world| log.borrow_mut().push("unmount".into())))
                    })
                }),
            )
            .unwrap();
        assert!(log.borrow().is_empty());

        let uuid: SystemUuid = "materials".into();
        runner.start_system(&mut world, &uuid, None).unwrap();
        runner.disable_system(&mut world, &uuid).unwrap();
        runner.start_system(&mut world, &uuid, None).unwrap();
        runner.unregister_system(&mut world, &uuid).unwrap();

        assert_eq!(*log.borrow(), vec!["mount", "unmount", "mount", "unmount"]);
        assert_eq!(world.binding_count(), 0);
        assert_eq!(runner.registry().system_count(), 0);
    }

    #[test]
    fn test_disable_cancels_owned_timers() {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        let fired = Rc::new(Cell::new(0));

        let counter = fired.clone();
        runner
            .define_system(
                &mut world,
                SystemDefinition::new("spawner").execute(move |_world, ctx| {
                    let counter = counter.clone();
                    ctx.schedule(Duration::from_millis(20), move |_world: &mut World| {
                        counter.set(counter.get() + 1);
                        Step::Done
                    });
                    Ok(())
                }),
            )
            .unwrap();
        let uuid: SystemUuid = "spawner".into();
        runner.start_system(&mut world, &uuid, None).unwrap();

        runner.tick(&mut world, 0.010);
        assert_eq!(runner.pending_timers(), 1);
        runner.tick(&mut world, 0.010);
        runner.tick(&mut world, 0.010);
        assert_eq!(fired.get(), 1);

        runner.disable_system(&mut world, &uuid).unwrap();
        assert_eq!(runner.pending_timers(), 0);
        runner.tick(&mut world, 1.0);
        assert_eq!(fired.get(), 1);
    }
}
