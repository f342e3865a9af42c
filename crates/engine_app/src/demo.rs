//! Demo scene: moving bodies and beacons that glow while armed.
//!
//! Registers the demo components, a `simulation` group with a `movement`
//! system inside it, and an "On Query" node that logs every body entering
//! the moving set.

use engine_component::{
    BoxError, Cleanup, Commands, Component, EcsError, Effect, Entity, EntityUuid, JsonComponent,
    QueryDescriptor, Reactor, World,
};
use engine_system::{OnQuery, OnQueryConfig, SystemDefinition, SystemRunner, SystemUuid};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

pub const SIMULATION: &str = "simulation";
pub const MOVEMENT: &str = "movement";

/// World-space position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position(pub Vec3);

impl Component for Position {
    type Patch = Vec3;

    fn type_name() -> &'static str {
        "Position"
    }

    fn on_init(_entity: Entity) -> Self {
        Self(Vec3::ZERO)
    }

    fn on_set(&mut self, _entity: Entity, patch: Vec3, _commands: &mut Commands) {
        self.0 = patch;
    }
}

impl JsonComponent for Position {
    fn to_json(&self) -> Value {
        json!(self.0.to_array())
    }

    fn patch_from_json(json: Value) -> Result<Vec3, serde_json::Error> {
        serde_json::from_value(json)
    }
}

/// Units per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Velocity(pub Vec3);

impl Component for Velocity {
    type Patch = Vec3;

    fn type_name() -> &'static str {
        "Velocity"
    }

    fn on_init(_entity: Entity) -> Self {
        Self(Vec3::ZERO)
    }

    fn on_set(&mut self, _entity: Entity, patch: Vec3, _commands: &mut Commands) {
        self.0 = patch;
    }
}

impl JsonComponent for Velocity {
    fn to_json(&self) -> Value {
        json!(self.0.to_array())
    }

    fn patch_from_json(json: Value) -> Result<Vec3, serde_json::Error> {
        serde_json::from_value(json)
    }
}

/// Marker kept on a beacon while it is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glow;

impl Component for Glow {
    type Patch = ();

    fn type_name() -> &'static str {
        "Glow"
    }

    fn on_init(_entity: Entity) -> Self {
        Self
    }

    fn on_set(&mut self, _entity: Entity, _patch: (), _commands: &mut Commands) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub label: String,
    pub armed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconPatch {
    pub label: Option<String>,
    pub armed: Option<bool>,
}

impl Component for Beacon {
    type Patch = BeaconPatch;

    fn type_name() -> &'static str {
        "Beacon"
    }

    fn on_init(_entity: Entity) -> Self {
        Self {
            label: "beacon".to_string(),
            armed: true,
        }
    }

    /// A beacon needs a position; one at the origin is added if missing.
    fn on_set(&mut self, entity: Entity, patch: BeaconPatch, commands: &mut Commands) {
        if let Some(label) = patch.label {
            self.label = label;
        }
        if let Some(armed) = patch.armed {
            self.armed = armed;
        }
        commands.push(move |world| {
            if world.has_component::<Position>(entity) {
                Ok(())
            } else {
                world.set_component::<Position>(entity, Vec3::ZERO)
            }
        });
    }

    fn reactor() -> Option<Reactor> {
        let glow = Effect::new(|world: &mut World, entity: Entity| -> Result<Cleanup, BoxError> {
            let armed = world.get_component::<Beacon>(entity)?.armed;
            if !armed {
                return Ok(Cleanup::none());
            }
            world.set_component::<Glow>(entity, ())?;
            debug!(%entity, "beacon armed");
            Ok(Cleanup::fallible(move |world| {
                world.remove_component::<Glow>(entity)?;
                debug!(%entity, "beacon disarmed");
                Ok(())
            }))
        })
        .with_deps(|world, entity| {
            let armed = world
                .get_optional_component::<Beacon>(entity)
                .is_some_and(|beacon| beacon.armed);
            vec![json!(armed)]
        });
        Some(Reactor::new().effect(glow))
    }
}

impl JsonComponent for Beacon {
    fn to_json(&self) -> Value {
        json!({ "label": self.label, "armed": self.armed })
    }

    fn patch_from_json(json: Value) -> Result<BeaconPatch, serde_json::Error> {
        serde_json::from_value(json)
    }
}

/// Register the demo components with `world`.
///
/// # Errors
///
/// [`EcsError::DuplicateComponent`] if another type already uses one of the
/// names.
pub fn register_components(world: &mut World) -> Result<(), EcsError> {
    world.register_json_component::<Position>()?;
    world.register_json_component::<Velocity>()?;
    world.register_json_component::<Beacon>()?;
    world.register_component::<Glow>()?;
    Ok(())
}

/// Define and start the demo systems. Returns the "On Query" node logging
/// bodies that start moving.
///
/// # Errors
///
/// Propagates registration and ordering failures.
pub fn install_systems(runner: &mut SystemRunner, world: &mut World) -> anyhow::Result<OnQuery> {
    runner.define_system(world, SystemDefinition::new(SIMULATION))?;
    runner.start_system(world, &SystemUuid::from(SIMULATION), None)?;

    let moving = world.define_query(QueryDescriptor::new().with::<Position>().with::<Velocity>());
    let movement = SystemDefinition::new(MOVEMENT)
        .with(SIMULATION)
        .execute(move |world, ctx| {
            let dt = ctx.dt as f32;
            for entity in world.query(moving) {
                let velocity = world.get_component::<Velocity>(entity)?.0;
                world.update_component::<Position, _>(entity, |position| {
                    position.0 += velocity * dt;
                })?;
            }
            Ok(())
        });
    runner.define_system(world, movement)?;

    let node = OnQuery::init(
        runner,
        world,
        OnQueryConfig::new(["Position", "Velocity"]).anchor(SIMULATION),
        |world, entity| {
            let position = world
                .get_optional_component::<Position>(entity)
                .map(|position| position.0);
            info!(%entity, ?position, "body started moving");
        },
    )?;
    Ok(node)
}

/// Spawn `count` bodies with stable uuids. Every third body is a beacon.
///
/// # Errors
///
/// Propagates component errors.
pub fn spawn_bodies(world: &mut World, count: usize) -> Result<Vec<Entity>, EcsError> {
    let mut spawned = Vec::with_capacity(count);
    for index in 0..count {
        let entity = world.create_entity();
        world.set_entity_uuid(entity, EntityUuid::generate())?;
        let offset = index as f32;
        world.set_component::<Position>(entity, Vec3::new(offset, 0.0, 0.0))?;
        world.set_component::<Velocity>(entity, Vec3::new(0.0, 1.0, 0.0))?;
        if index % 3 == 0 {
            world.set_component::<Beacon>(
                entity,
                BeaconPatch {
                    label: Some(format!("beacon-{index}")),
                    armed: Some(true),
                },
            )?;
        }
        spawned.push(entity);
    }
    info!(count, "bodies spawned");
    Ok(spawned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(count: usize) -> (World, SystemRunner, Vec<Entity>) {
        let mut world = World::default();
        let mut runner = SystemRunner::new();
        register_components(&mut world).unwrap();
        install_systems(&mut runner, &mut world).unwrap();
        let bodies = spawn_bodies(&mut world, count).unwrap();
        (world, runner, bodies)
    }

    #[test]
    fn test_movement_runs_inside_simulation() {
        let (mut world, mut runner, bodies) = scene(2);
        let order = runner.registry().enabled_order();
        assert_eq!(order[0].as_str(), SIMULATION);
        assert_eq!(order[1].as_str(), MOVEMENT);

        runner.tick(&mut world, 0.5);
        let position = world.get_component::<Position>(bodies[1]).unwrap().0;
        assert!((position - Vec3::new(1.0, 0.5, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_beacon_glows_while_armed() {
        let mut world = World::default();
        register_components(&mut world).unwrap();
        let entity = world.create_entity();

        world
            .set_component::<Beacon>(entity, BeaconPatch::default())
            .unwrap();
        assert!(world.has_component::<Position>(entity));
        assert!(world.has_component::<Glow>(entity));

        let disarm = BeaconPatch {
            armed: Some(false),
            ..BeaconPatch::default()
        };
        world.set_component::<Beacon>(entity, disarm).unwrap();
        assert!(!world.has_component::<Glow>(entity));

        world
            .update_component::<Beacon, _>(entity, |beacon| beacon.armed = true)
            .unwrap();
        assert!(world.has_component::<Glow>(entity));

        world.remove_component::<Beacon>(entity).unwrap();
        assert!(!world.has_component::<Glow>(entity));
        assert!(world.drain_faults().is_empty());
    }

    #[test]
    fn test_snapshot_keeps_demo_state() {
        let (world, _runner, bodies) = scene(3);
        let snapshot = world.snapshot();
        assert_eq!(snapshot.entities.len(), bodies.len());

        let mut restored = World::default();
        register_components(&mut restored).unwrap();
        let loaded = restored.load_snapshot(&snapshot).unwrap();
        assert_eq!(loaded.len(), 3);

        let beacon = restored
            .entity_by_uuid(world.entity_uuid(bodies[0]).unwrap())
            .unwrap();
        assert_eq!(
            restored.get_component::<Beacon>(beacon).unwrap().label,
            "beacon-0"
        );
        assert!(restored.has_component::<Glow>(beacon));
    }
}
