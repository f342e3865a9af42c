//! Fixed-timestep tick loop.
//!
//! Each tick hands the fixed `dt` to the [`SystemRunner`], which steps due
//! timers, runs enabled systems in resolved order and re-checks system
//! bindings. Reactor faults raised during the tick are drained and logged.

use std::time::{Duration, Instant};

use engine_component::World;
use engine_system::{SystemRunner, TickReport};
use tracing::{debug, error, info, warn};

/// Configuration for the tick loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60.0,
            max_ticks: 0,
        }
    }
}

impl TickConfig {
    /// Length of one tick. Non-positive rates fall back to 60 Hz.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        let rate = if self.tick_rate.is_finite() && self.tick_rate > 0.0 {
            self.tick_rate
        } else {
            60.0
        };
        Duration::from_secs_f64(1.0 / rate)
    }
}

/// Owns the world and the system runner.
#[derive(Debug)]
pub struct TickLoop {
    config: TickConfig,
    world: World,
    runner: SystemRunner,
}

impl TickLoop {
    #[must_use]
    pub fn new(config: TickConfig, world: World) -> Self {
        Self {
            config,
            world,
            runner: SystemRunner::new(),
        }
    }

    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.runner.tick_id()
    }

    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The world and the runner, borrowed together for system setup.
    pub fn parts_mut(&mut self) -> (&mut World, &mut SystemRunner) {
        (&mut self.world, &mut self.runner)
    }

    #[must_use]
    pub fn runner(&self) -> &SystemRunner {
        &self.runner
    }

    /// Run one tick.
    pub fn tick(&mut self, dt: f64) -> TickReport {
        let report = self.runner.tick(&mut self.world, dt);
        for failure in &report.failures {
            warn!(
                tick_id = report.tick_id,
                system = %failure.system,
                error = %failure.error,
                "system disabled after failure"
            );
        }
        for fault in self.world.drain_faults() {
            error!(
                tick_id = report.tick_id,
                entity = %fault.key.entity,
                owner = ?fault.key.owner,
                phase = ?fault.phase,
                error = %fault.error,
                "reactor fault"
            );
        }
        debug!(
            tick_id = report.tick_id,
            entities = self.world.entity_count(),
            "tick done"
        );
        report
    }

    fn finished(&self) -> bool {
        self.config.max_ticks > 0 && self.tick_id() >= self.config.max_ticks
    }

    /// Run the tick loop for the configured number of ticks, or forever.
    ///
    /// Blocking; sleeps out the rest of each tick's budget.
    pub fn run(&mut self) {
        let tick_duration = self.config.tick_duration();
        let dt = tick_duration.as_secs_f64();

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        while !self.finished() {
            let start = Instant::now();
            self.tick(dt);

            let elapsed = start.elapsed();
            if elapsed < tick_duration {
                if !self.finished() {
                    std::thread::sleep(tick_duration - elapsed);
                }
            } else {
                warn!(
                    tick_id = self.tick_id(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
        info!(ticks = self.tick_id(), "tick loop complete");
    }

    /// Async variant of [`TickLoop::run`] that also stops on Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the Ctrl-C handler can not be installed.
    pub async fn run_async(&mut self) -> anyhow::Result<()> {
        let tick_duration = self.config.tick_duration();
        let dt = tick_duration.as_secs_f64();
        let mut interval = tokio::time::interval(tick_duration);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        while !self.finished() {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(dt);
                }
                signal = &mut shutdown => {
                    signal?;
                    info!(tick_id = self.tick_id(), "shutdown requested");
                    break;
                }
            }
        }
        info!(ticks = self.tick_id(), "tick loop complete");
        Ok(())
    }
}
