//! System registry: tracks registered systems and their resolved order.
//!
//! The registry keeps every system that was defined, enabled or not, in
//! registration order. Any change to the set of systems or their
//! constraints re-resolves the execution order immediately; a change that
//! would create a cycle is rolled back.

use engine_component::ReactorFactory;
use indexmap::IndexMap;
use tracing::{debug, info};

use crate::config::{ExecuteFn, Insert, SystemDefinition, SystemUuid};
use crate::error::SchedulerError;
use crate::scheduler::{self, OrderEntry};

/// A registered system.
pub(crate) struct SystemEntry {
    /// Registration sequence; also keys the system's reactive binding.
    pub id: u64,
    pub insert: Insert,
    /// `None` while the execute function is running, or if there is none.
    pub execute: Option<ExecuteFn>,
    pub reactor: Option<ReactorFactory>,
    pub enabled: bool,
}

/// Registry of all systems known to the runner.
#[derive(Default)]
pub struct SystemRegistry {
    systems: IndexMap<SystemUuid, SystemEntry>,
    order: Vec<SystemUuid>,
    next_id: u64,
    generated: u64,
}

impl SystemRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a system. Definitions with any insert constraint start out
    /// enabled.
    pub(crate) fn register(&mut self, definition: SystemDefinition) -> Result<u64, SchedulerError> {
        if self.systems.contains_key(&definition.uuid) {
            return Err(SchedulerError::DuplicateSystem(definition.uuid));
        }

        let id = self.next_id;
        self.next_id += 1;
        let uuid = definition.uuid.clone();
        self.systems.insert(
            definition.uuid,
            SystemEntry {
                id,
                enabled: !definition.insert.is_empty(),
                insert: definition.insert,
                execute: definition.execute,
                reactor: definition.reactor,
            },
        );

        match self.resolve() {
            Ok(order) => {
                self.order = order;
                info!(system = %uuid, systems = self.systems.len(), "system registered");
                Ok(id)
            }
            Err(err) => {
                self.systems.shift_remove(&uuid);
                Err(err)
            }
        }
    }

    /// Replace the constraints of `uuid`, rolling back on a cycle.
    pub(crate) fn set_insert(
        &mut self,
        uuid: &SystemUuid,
        insert: Insert,
    ) -> Result<(), SchedulerError> {
        let entry = self
            .systems
            .get_mut(uuid)
            .ok_or_else(|| SchedulerError::UnknownSystem(uuid.clone()))?;
        let previous = std::mem::replace(&mut entry.insert, insert);

        match self.resolve() {
            Ok(order) => {
                self.order = order;
                debug!(system = %uuid, "system re-anchored");
                Ok(())
            }
            Err(err) => {
                if let Some(entry) = self.systems.get_mut(uuid) {
                    entry.insert = previous;
                }
                Err(err)
            }
        }
    }

    pub(crate) fn remove(&mut self, uuid: &SystemUuid) -> Option<SystemEntry> {
        let entry = self.systems.shift_remove(uuid)?;
        // Dropping nodes can not introduce a cycle; the fallback only keeps
        // the surviving order if resolution fails anyway.
        match self.resolve() {
            Ok(order) => self.order = order,
            Err(_) => self.order.retain(|other| other != uuid),
        }
        info!(system = %uuid, systems = self.systems.len(), "system unregistered");
        Some(entry)
    }

    pub(crate) fn get(&self, uuid: &SystemUuid) -> Option<&SystemEntry> {
        self.systems.get(uuid)
    }

    pub(crate) fn get_mut(&mut self, uuid: &SystemUuid) -> Option<&mut SystemEntry> {
        self.systems.get_mut(uuid)
    }

    /// A fresh system uuid `"{prefix}-{n}"` that is not registered.
    pub fn generate_uuid(&mut self, prefix: &str) -> SystemUuid {
        loop {
            let uuid = SystemUuid::new(format!("{prefix}-{}", self.generated));
            self.generated += 1;
            if !self.systems.contains_key(&uuid) {
                return uuid;
            }
        }
    }

    #[must_use]
    pub fn contains(&self, uuid: &SystemUuid) -> bool {
        self.systems.contains_key(uuid)
    }

    #[must_use]
    pub fn is_enabled(&self, uuid: &SystemUuid) -> bool {
        self.systems.get(uuid).is_some_and(|entry| entry.enabled)
    }

    /// Enabled, and every group it runs `with` is active as well. A group
    /// that is not registered does not hold its members back.
    #[must_use]
    pub fn is_active(&self, uuid: &SystemUuid) -> bool {
        let mut current = uuid;
        // Group chains are acyclic; the bound only guards the walk.
        for _ in 0..=self.systems.len() {
            let Some(entry) = self.systems.get(current) else {
                return current != uuid;
            };
            if !entry.enabled {
                return false;
            }
            match &entry.insert.with {
                Some(group) => current = group,
                None => return true,
            }
        }
        false
    }

    /// The constraints `uuid` is currently ordered with.
    #[must_use]
    pub fn insert_of(&self, uuid: &SystemUuid) -> Option<&Insert> {
        self.systems.get(uuid).map(|entry| &entry.insert)
    }

    /// Every registered system in execution order, enabled or not.
    #[must_use]
    pub fn order(&self) -> &[SystemUuid] {
        &self.order
    }

    /// Enabled systems in execution order.
    #[must_use]
    pub fn enabled_order(&self) -> Vec<SystemUuid> {
        self.order
            .iter()
            .filter(|uuid| self.is_enabled(uuid))
            .cloned()
            .collect()
    }

    /// Active systems in execution order: what a tick runs.
    #[must_use]
    pub fn active_order(&self) -> Vec<SystemUuid> {
        self.order
            .iter()
            .filter(|uuid| self.is_active(uuid))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    fn resolve(&self) -> Result<Vec<SystemUuid>, SchedulerError> {
        let entries: Vec<OrderEntry<'_>> = self
            .systems
            .iter()
            .map(|(uuid, entry)| OrderEntry {
                seq: entry.id,
                uuid,
                insert: &entry.insert,
            })
            .collect();
        scheduler::resolve_order(&entries)
    }
}

impl std::fmt::Debug for SystemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemRegistry")
            .field("order", &self.order)
            .field("enabled", &self.enabled_order())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(order: &[SystemUuid]) -> Vec<&str> {
        order.iter().map(SystemUuid::as_str).collect()
    }

    #[test]
    fn test_register_new_system() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("physics")).unwrap();
        assert_eq!(registry.system_count(), 1);
        assert!(registry.contains(&"physics".into()));
        // No constraints: registered but inactive.
        assert!(!registry.is_enabled(&"physics".into()));
        assert!(registry.enabled_order().is_empty());
    }

    #[test]
    fn test_constrained_definition_starts_enabled() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("input")).unwrap();
        registry
            .register(SystemDefinition::new("movement").after("input"))
            .unwrap();
        assert!(registry.is_enabled(&"movement".into()));
        assert_eq!(names(registry.order()), vec!["input", "movement"]);
    }

    #[test]
    fn test_duplicate_uuid_rejected() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("physics")).unwrap();
        assert_eq!(
            registry.register(SystemDefinition::new("physics")).unwrap_err(),
            SchedulerError::DuplicateSystem("physics".into())
        );
        assert_eq!(registry.system_count(), 1);
    }

    #[test]
    fn test_cycle_rolls_back_registration() {
        let mut registry = SystemRegistry::new();
        registry
            .register(SystemDefinition::new("a").after("b"))
            .unwrap();
        let err = registry
            .register(SystemDefinition::new("b").after("a"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::OrderingCycle(_)));
        assert!(!registry.contains(&"b".into()));
        assert_eq!(names(registry.order()), vec!["a"]);
    }

    #[test]
    fn test_cycle_rolls_back_reanchor() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("a").after("b")).unwrap();
        registry.register(SystemDefinition::new("b").before("c")).unwrap();
        registry.register(SystemDefinition::new("c").with("g")).unwrap();

        let err = registry
            .set_insert(&"b".into(), Insert::after("a"))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::OrderingCycle(_)));
        assert_eq!(registry.insert_of(&"b".into()), Some(&Insert::before("c")));
        assert_eq!(names(registry.order()), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_remove_reresolves() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("a").after("b")).unwrap();
        registry.register(SystemDefinition::new("b")).unwrap();
        assert_eq!(names(registry.order()), vec!["b", "a"]);
        assert!(registry.remove(&"b".into()).is_some());
        assert_eq!(names(registry.order()), vec!["a"]);
        assert!(registry.remove(&"b".into()).is_none());
    }

    #[test]
    fn test_members_follow_group_enable_state() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("group").after("clock")).unwrap();
        registry.register(SystemDefinition::new("member").with("group")).unwrap();
        registry.register(SystemDefinition::new("nested").with("member")).unwrap();
        registry.register(SystemDefinition::new("orphan").with("missing")).unwrap();
        assert_eq!(
            names(&registry.active_order()),
            vec!["group", "member", "nested", "orphan"]
        );

        if let Some(entry) = registry.get_mut(&"group".into()) {
            entry.enabled = false;
        }
        assert!(registry.is_enabled(&"member".into()));
        assert!(!registry.is_active(&"member".into()));
        assert!(!registry.is_active(&"nested".into()));
        assert_eq!(names(&registry.active_order()), vec!["orphan"]);
        assert!(!registry.is_active(&"unknown".into()));
    }

    #[test]
    fn test_generate_uuid_skips_taken_names() {
        let mut registry = SystemRegistry::new();
        registry.register(SystemDefinition::new("node-1")).unwrap();
        assert_eq!(registry.generate_uuid("node").as_str(), "node-0");
        assert_eq!(registry.generate_uuid("node").as_str(), "node-2");
    }
}
