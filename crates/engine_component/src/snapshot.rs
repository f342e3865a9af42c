//! Whole-world snapshots of JSON-capable components.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::entity::Entity;
use crate::error::EcsError;
use crate::uuid_table::EntityUuid;
use crate::world::World;

/// One entity: its UUID (if any) and its serialisable components by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<EntityUuid>,
    #[serde(default)]
    pub components: BTreeMap<String, Value>,
}

/// Every live entity in creation order. Components registered without a
/// JSON contract are left out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub entities: Vec<EntitySnapshot>,
}

impl World {
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let entities = self
            .entities()
            .into_iter()
            .map(|entity| {
                let components = self
                    .entity_components(entity)
                    .into_iter()
                    .filter_map(|type_id| {
                        let name = self.component_name(type_id)?;
                        let codec = self.json_codec_by_id(type_id)?;
                        Some((name.to_string(), (codec.to_json)(self, entity)?))
                    })
                    .collect();
                EntitySnapshot {
                    uuid: self.entity_uuid(entity),
                    components,
                }
            })
            .collect();
        WorldSnapshot { entities }
    }

    /// Recreate the entities of `snapshot` in this world. Returns the new
    /// entities in snapshot order.
    ///
    /// UUIDs, component names and JSON payloads are validated up front, and
    /// entities created before a failing hook are destroyed again, so a bad
    /// snapshot changes nothing.
    ///
    /// # Errors
    ///
    /// [`EcsError::DuplicateUuid`] if a UUID is taken (or repeated),
    /// [`EcsError::UnknownComponent`] / [`EcsError::NotSerialisable`] for an
    /// unusable component name, or the first error raised while applying a
    /// component.
    pub fn load_snapshot(&mut self, snapshot: &WorldSnapshot) -> Result<Vec<Entity>, EcsError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &snapshot.entities {
            if let Some(uuid) = entry.uuid {
                if let Some(owner) = self.entity_by_uuid(uuid) {
                    return Err(EcsError::DuplicateUuid { uuid, owner });
                }
                if !seen.insert(uuid) {
                    return Err(EcsError::DuplicateUuid {
                        uuid,
                        owner: Entity::INVALID,
                    });
                }
            }
            for (name, json) in &entry.components {
                let type_id = self
                    .component_id_by_name(name)
                    .ok_or_else(|| EcsError::UnknownComponent(name.clone()))?;
                let codec = self
                    .json_codec_by_id(type_id)
                    .ok_or_else(|| EcsError::NotSerialisable(name.clone()))?;
                (codec.validate)(json)?;
            }
        }

        let mut created = Vec::with_capacity(snapshot.entities.len());
        if let Err(err) = self.apply_snapshot(snapshot, &mut created) {
            // A hook can still fail; undo what was created so far.
            for entity in created.into_iter().rev() {
                if let Err(undo) = self.destroy_entity(entity) {
                    warn!(%entity, error = %undo, "snapshot rollback failed");
                }
            }
            return Err(err);
        }
        info!(entities = created.len(), "snapshot loaded");
        Ok(created)
    }

    fn apply_snapshot(
        &mut self,
        snapshot: &WorldSnapshot,
        created: &mut Vec<Entity>,
    ) -> Result<(), EcsError> {
        for entry in &snapshot.entities {
            let entity = self.create_entity();
            created.push(entity);
            if let Some(uuid) = entry.uuid {
                self.set_entity_uuid(entity, uuid)?;
            }
            for (name, json) in &entry.components {
                self.set_component_json(entity, name, json.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::codec;
    use crate::commands::Commands;
    use crate::component::{Component, JsonComponent};

    #[derive(Debug, Clone, PartialEq)]
    struct Name(String);

    impl Component for Name {
        type Patch = String;
        fn type_name() -> &'static str {
            "Name"
        }
        fn on_init(_entity: Entity) -> Self {
            Self(String::new())
        }
        fn on_set(&mut self, _entity: Entity, patch: String, _commands: &mut Commands) {
            self.0 = patch;
        }
    }

    impl JsonComponent for Name {
        fn to_json(&self) -> Value {
            Value::String(self.0.clone())
        }
        fn patch_from_json(json: Value) -> Result<String, serde_json::Error> {
            serde_json::from_value(json)
        }
    }

    /// Runtime-only state, never persisted.
    struct Hovered;

    impl Component for Hovered {
        type Patch = ();
        fn type_name() -> &'static str {
            "Hovered"
        }
        fn on_init(_entity: Entity) -> Self {
            Self
        }
        fn on_set(&mut self, _entity: Entity, _patch: (), _commands: &mut Commands) {}
    }

    fn sample_world() -> World {
        let mut world = World::default();
        world.register_json_component::<Name>().unwrap();
        let a = world.create_entity();
        world.set_component::<Name>(a, "crate".into()).unwrap();
        world.set_component::<Hovered>(a, ()).unwrap();
        world
            .set_entity_uuid(a, EntityUuid::parse("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap())
            .unwrap();
        let b = world.create_entity();
        world.set_component::<Name>(b, "barrel".into()).unwrap();
        world
    }

    #[test]
    fn test_snapshot_skips_runtime_components() {
        let snapshot = sample_world().snapshot();
        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(
            snapshot.entities[0].components,
            BTreeMap::from([("Name".to_string(), json!("crate"))])
        );
        assert!(snapshot.entities[0].uuid.is_some());
        assert!(snapshot.entities[1].uuid.is_none());
    }

    #[test]
    fn test_snapshot_survives_messagepack_and_reload() {
        let snapshot = sample_world().snapshot();
        let bytes = codec::encode(&snapshot).unwrap();
        let decoded: WorldSnapshot = codec::decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let mut restored = World::default();
        restored.register_json_component::<Name>().unwrap();
        let entities = restored.load_snapshot(&decoded).unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(restored.get_component::<Name>(entities[1]).unwrap().0, "barrel");
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_load_rejects_taken_uuid_without_changes() {
        let mut world = sample_world();
        let snapshot = world.snapshot();
        let before = world.entity_count();
        assert!(matches!(
            world.load_snapshot(&snapshot),
            Err(EcsError::DuplicateUuid { .. })
        ));
        assert_eq!(world.entity_count(), before);
    }

    #[test]
    fn test_load_rejects_bad_payload_after_valid_entry() {
        let mut world = World::default();
        world.register_json_component::<Name>().unwrap();
        let uuid = EntityUuid::generate();
        let snapshot = WorldSnapshot {
            entities: vec![
                EntitySnapshot {
                    uuid: Some(uuid),
                    components: BTreeMap::from([("Name".to_string(), json!("crate"))]),
                },
                EntitySnapshot {
                    uuid: None,
                    components: BTreeMap::from([("Name".to_string(), json!({ "lots": 5 }))]),
                },
            ],
        };
        assert!(matches!(
            world.load_snapshot(&snapshot),
            Err(EcsError::Json { component, .. }) if component == "Name"
        ));
        assert_eq!(world.entity_count(), 0);
        assert!(world.entity_by_uuid(uuid).is_none());
    }

    #[test]
    fn test_load_rejects_unknown_component() {
        let mut world = World::default();
        let snapshot = WorldSnapshot {
            entities: vec![EntitySnapshot {
                uuid: None,
                components: BTreeMap::from([("Ghost".to_string(), json!(1))]),
            }],
        };
        assert!(matches!(
            world.load_snapshot(&snapshot),
            Err(EcsError::UnknownComponent(name)) if name == "Ghost"
        ));
        assert_eq!(world.entity_count(), 0);
    }
}
