//! # engine_app
//!
//! Runs the engine ECS locally: builds a world, installs the demo scene and
//! drives it with a fixed-timestep tick loop until `--max-ticks` is reached
//! or Ctrl-C is pressed.

mod demo;
mod tick;

use anyhow::Result;
use clap::Parser;
use engine_component::{World, WorldConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tick::{TickConfig, TickLoop};

#[derive(Debug, Parser)]
#[command(name = "engine_app", about = "Run the engine ECS demo scene")]
struct Args {
    /// Target ticks per second.
    #[arg(long, env = "ENGINE_TICK_RATE", default_value_t = 60.0)]
    tick_rate: f64,

    /// Stop after this many ticks (0 = run until Ctrl-C).
    #[arg(long, env = "ENGINE_MAX_TICKS", default_value_t = 0)]
    max_ticks: u64,

    /// Fail when destroying an entity that does not exist.
    #[arg(long, env = "ENGINE_STRICT_ENTITIES")]
    strict_entities: bool,

    /// Number of demo bodies to spawn.
    #[arg(long, env = "ENGINE_ENTITIES", default_value_t = 8)]
    entities: usize,

    /// Drive ticks from a blocking thread-sleep loop instead of the tokio
    /// interval. Ctrl-C is not handled in this mode.
    #[arg(long, env = "ENGINE_BLOCKING")]
    blocking: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let args = Args::parse();
    info!(?args, "engine starting");

    let world = World::new(WorldConfig {
        strict_entities: args.strict_entities,
    });
    let mut tick_loop = TickLoop::new(
        TickConfig {
            tick_rate: args.tick_rate,
            max_ticks: args.max_ticks,
        },
        world,
    );

    let (world, runner) = tick_loop.parts_mut();
    demo::register_components(world)?;
    let node = demo::install_systems(runner, world)?;
    demo::spawn_bodies(world, args.entities)?;

    if args.blocking {
        tick_loop.run();
    } else {
        tick_loop.run_async().await?;
    }

    let (world, runner) = tick_loop.parts_mut();
    node.dispose(runner, world);
    info!(
        entities = tick_loop.world().entity_count(),
        systems = tick_loop.runner().registry().system_count(),
        ticks = tick_loop.tick_id(),
        "engine shut down"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_and_blocking_flag() {
        let args = Args::parse_from(["engine_app"]);
        assert!(!args.blocking);
        assert_eq!(args.entities, 8);

        let args = Args::parse_from(["engine_app", "--blocking", "--max-ticks", "3"]);
        assert!(args.blocking);
        assert_eq!(args.max_ticks, 3);
    }
}
