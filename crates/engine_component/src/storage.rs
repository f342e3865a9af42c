//! Per-component-type storage.
//!
//! Every component type gets one [`Column`]: a dense vector of values plus a
//! sparse `entity → row` index. Removal swaps the last row into the freed
//! slot, so `has`, `get` and `remove` are all `O(1)`.

use std::any::Any;
use std::collections::HashMap;

use crate::component::{Component, ComponentTypeId};
use crate::entity::Entity;

/// Dense storage for one component type.
#[derive(Debug)]
pub struct Column<T> {
    /// Row of each stored entity.
    sparse: HashMap<Entity, usize>,
    /// `entities[i]` owns `values[i]`.
    entities: Vec<Entity>,
    values: Vec<T>,
}

impl<T> Column<T> {
    /// Create a new empty column.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sparse: HashMap::new(),
            entities: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Returns the number of stored components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if this column contains no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.sparse.contains_key(&entity)
    }

    /// Store `value` for `entity`, replacing any previous value.
    pub fn insert(&mut self, entity: Entity, value: T) {
        if let Some(&row) = self.sparse.get(&entity) {
            self.values[row] = value;
            return;
        }
        self.sparse.insert(entity, self.values.len());
        self.entities.push(entity);
        self.values.push(value);
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.sparse.get(&entity).map(|&row| &self.values[row])
    }

    #[must_use]
    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        let row = *self.sparse.get(&entity)?;
        Some(&mut self.values[row])
    }

    /// Remove and return the value stored for `entity`.
    pub fn remove(&mut self, entity: Entity) -> Option<T> {
        let row = self.sparse.remove(&entity)?;
        let last = self.values.len() - 1;
        if row != last {
            let moved = self.entities[last];
            self.sparse.insert(moved, row);
        }
        self.entities.swap_remove(row);
        Some(self.values.swap_remove(row))
    }

    /// Entities with a value in this column, in storage order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Object-safe view of a [`Column`] used where the component type is only
/// known by id.
pub(crate) trait ErasedColumn {
    fn contains(&self, entity: Entity) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> ErasedColumn for Column<T> {
    fn contains(&self, entity: Entity) -> bool {
        Column::contains(self, entity)
    }

    fn len(&self) -> usize {
        Column::len(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// All component columns, keyed by [`ComponentTypeId`].
#[derive(Default)]
pub(crate) struct ComponentStore {
    columns: HashMap<ComponentTypeId, Box<dyn ErasedColumn>>,
}

impl ComponentStore {
    pub fn column<T: Component>(&self) -> Option<&Column<T>> {
        self.columns
            .get(&T::component_type_id())?
            .as_any()
            .downcast_ref::<Column<T>>()
    }

    pub fn column_mut<T: Component>(&mut self) -> Option<&mut Column<T>> {
        self.columns
            .get_mut(&T::component_type_id())?
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Returns the column for `T`, creating it on first use.
    pub fn column_or_insert<T: Component>(&mut self) -> &mut Column<T> {
        let column = self
            .columns
            .entry(T::component_type_id())
            .or_insert_with(|| Box::new(Column::<T>::new()));
        match column.as_any_mut().downcast_mut::<Column<T>>() {
            Some(typed) => typed,
            // Registration rejects a second Rust type under the same name,
            // so the stored column always has type `T`.
            None => unreachable!("column type mismatch for `{}`", T::type_name()),
        }
    }

    pub fn contains(&self, entity: Entity, type_id: ComponentTypeId) -> bool {
        self.columns
            .get(&type_id)
            .is_some_and(|column| column.contains(entity))
    }

    /// Total number of stored component instances across all columns.
    pub fn instance_count(&self) -> usize {
        self.columns.values().map(|column| column.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_insert_and_get() {
        let mut col = Column::new();
        col.insert(Entity(1), 3.5_f32);
        assert_eq!(col.len(), 1);
        assert_eq!(col.get(Entity(1)), Some(&3.5));
        assert!(col.get(Entity(2)).is_none());
    }

    #[test]
    fn test_column_insert_replaces_existing() {
        let mut col = Column::new();
        col.insert(Entity(1), 1);
        col.insert(Entity(1), 2);
        assert_eq!(col.len(), 1);
        assert_eq!(col.get(Entity(1)), Some(&2));
    }

    #[test]
    fn test_column_swap_remove_keeps_index_consistent() {
        let mut col = Column::new();
        col.insert(Entity(1), "a");
        col.insert(Entity(2), "b");
        col.insert(Entity(3), "c");

        assert_eq!(col.remove(Entity(1)), Some("a"));
        // Entity 3 moved into row 0.
        assert_eq!(col.get(Entity(3)), Some(&"c"));
        assert_eq!(col.get(Entity(2)), Some(&"b"));
        assert_eq!(col.entities(), &[Entity(3), Entity(2)]);

        assert_eq!(col.remove(Entity(1)), None);
        assert_eq!(col.remove(Entity(2)), Some("b"));
        assert_eq!(col.remove(Entity(3)), Some("c"));
        assert!(col.is_empty());
    }

    #[test]
    fn test_column_get_mut() {
        let mut col = Column::new();
        col.insert(Entity(7), 10);
        if let Some(value) = col.get_mut(Entity(7)) {
            *value += 5;
        }
        assert_eq!(col.get(Entity(7)), Some(&15));
    }
}
