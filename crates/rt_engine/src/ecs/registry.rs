//! Entity registry backed by generational slot maps

use std::any::{Any, TypeId};
use std::collections::HashMap;

use slotmap::{new_key_type, SecondaryMap, SlotMap};

use super::Component;

new_key_type! {
    /// Entity identifier with a generation, so stale handles never alias new entities
    pub struct Entity;
}

trait ComponentColumn: Any + Send + Sync {
    fn remove_entity(&mut self, entity: Entity);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ComponentColumn for SecondaryMap<Entity, T> {
    fn remove_entity(&mut self, entity: Entity) {
        self.remove(entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Registry of entities and their typed components
#[derive(Default)]
pub struct Registry {
    entities: SlotMap<Entity, ()>,
    columns: HashMap<TypeId, Box<dyn ComponentColumn>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new entity
    pub fn spawn(&mut self) -> Entity {
        self.entities.insert(())
    }

    /// Destroy an entity and every component attached to it
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if self.entities.remove(entity).is_none() {
            return false;
        }
        for column in self.columns.values_mut() {
            column.remove_entity(entity);
        }
        true
    }

    /// Whether the entity is alive
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.contains_key(entity)
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity is alive
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Attach a component, returning the previous one of the same type
    ///
    /// Returns `None` without storing anything if the entity is dead.
    pub fn insert<T: Component>(&mut self, entity: Entity, component: T) -> Option<T> {
        if !self.contains(entity) {
            log::warn!("Ignoring component insert for dead entity {entity:?}");
            return None;
        }
        self.column_mut::<T>().insert(entity, component)
    }

    /// Get a component
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        self.column::<T>()?.get(entity)
    }

    /// Get a component mutably
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        self.columns
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<SecondaryMap<Entity, T>>()?
            .get_mut(entity)
    }

    /// Detach a component
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        self.columns
            .get_mut(&TypeId::of::<T>())?
            .as_any_mut()
            .downcast_mut::<SecondaryMap<Entity, T>>()?
            .remove(entity)
    }

    /// Iterate every entity carrying a component of type `T`
    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.column::<T>().into_iter().flat_map(SecondaryMap::iter)
    }

    /// First entity carrying a component of type `T`, in slot order
    pub fn first<T: Component>(&self) -> Option<(Entity, &T)> {
        self.iter::<T>().next()
    }

    fn column<T: Component>(&self) -> Option<&SecondaryMap<Entity, T>> {
        self.columns
            .get(&TypeId::of::<T>())?
            .as_any()
            .downcast_ref::<SecondaryMap<Entity, T>>()
    }

    fn column_mut<T: Component>(&mut self) -> &mut SecondaryMap<Entity, T> {
        let column = self
            .columns
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SecondaryMap::<Entity, T>::new()));
        match column.as_any_mut().downcast_mut::<SecondaryMap<Entity, T>>() {
            Some(map) => map,
            None => unreachable!("component column keyed by the wrong TypeId"),
        }
    }
}
