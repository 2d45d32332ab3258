//! Change tracking and the identity map.
//!
//! A [`TrackingScope`] is a unit-of-work boundary: every entity materialized
//! into it is registered under its `(entity type, primary key)` identity,
//! and re-materializing the same identity always yields the same instance.
//! Instances are shared as `Rc<RefCell<_>>`, so a scope is single-threaded
//! by construction; use one scope per unit of work.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use ferrite_core::value::Value;

/// A shared, mutable entity instance.
pub type EntityRef = Rc<RefCell<EntityData>>;

/// The property bag behind one tracked entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    /// Entity type name (the most-derived type for hierarchy-mapped rows).
    pub entity_type: String,
    /// Property name → current value.
    pub values: BTreeMap<String, Value>,
    /// Collection navigation name → materialized children.
    pub collections: BTreeMap<String, Vec<EntityRef>>,
}

impl EntityData {
    /// Creates an entity of the given type with no values set.
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values: BTreeMap::new(),
            collections: BTreeMap::new(),
        }
    }

    /// Sets a property value, builder style.
    #[must_use]
    pub fn with(mut self, property: &str, value: Value) -> Self {
        self.values.insert(String::from(property), value);
        self
    }

    /// Reads a property value.
    #[must_use]
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }
}

/// A primary-key value tuple usable as a map key.
///
/// `Value` itself is not `Eq`/`Hash` because of floats; key tuples compare
/// floats by bit pattern, which is exact for values round-tripped through
/// the database.
#[derive(Debug, Clone)]
pub struct KeyValue(pub Vec<Value>);

impl KeyValue {
    /// Returns whether every component is NULL.
    #[must_use]
    pub fn is_all_null(&self) -> bool {
        self.0.iter().all(Value::is_null)
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        if self.0.len() != other.0.len() {
            return false;
        }
        self.0.iter().zip(&other.0).all(|(a, b)| match (a, b) {
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
            (a, b) => a == b,
        })
    }
}

impl Eq for KeyValue {}

impl Hash for KeyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.0 {
            match value {
                Value::Null => 0_u8.hash(state),
                Value::Bool(b) => (1_u8, b).hash(state),
                Value::Int(n) => (2_u8, n).hash(state),
                Value::Float(f) => (3_u8, f.to_bits()).hash(state),
                Value::Text(s) => (4_u8, s).hash(state),
                Value::Blob(b) => (5_u8, b).hash(state),
            }
        }
    }
}

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Loaded from the store and unmodified.
    Unchanged,
    /// New; not yet in the store.
    Added,
    /// Loaded and modified since.
    Modified,
    /// Marked for deletion.
    Deleted,
    /// Not tracked by any scope.
    Detached,
}

/// One identity-map entry.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    /// The shared instance.
    pub instance: EntityRef,
    /// Entity type name the identity is registered under.
    pub entity_type: String,
    /// Primary-key tuple.
    pub key: KeyValue,
    /// Lifecycle state.
    pub state: EntityState,
    /// Property values as first loaded. Captured once, when the entity
    /// enters the scope, and only refreshed by [`TrackingScope::accept_changes`].
    pub original_values: BTreeMap<String, Value>,
}

/// The identity map plus change-state bookkeeping for one unit of work.
#[derive(Debug, Default)]
pub struct TrackingScope {
    entries: HashMap<(String, KeyValue), TrackedEntry>,
}

impl TrackingScope {
    /// Creates an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracked instance for an identity, creating and
    /// registering it when absent.
    ///
    /// When the identity is already tracked the existing instance is
    /// returned untouched; freshly read values never overwrite an instance
    /// the caller may have modified.
    pub fn resolve_or_insert(
        &mut self,
        entity_type: &str,
        key: KeyValue,
        create: impl FnOnce() -> EntityData,
    ) -> EntityRef {
        let map_key = (String::from(entity_type), key.clone());
        if let Some(entry) = self.entries.get(&map_key) {
            return Rc::clone(&entry.instance);
        }
        let data = create();
        let original_values = data.values.clone();
        let instance = Rc::new(RefCell::new(data));
        self.entries.insert(
            map_key,
            TrackedEntry {
                instance: Rc::clone(&instance),
                entity_type: String::from(entity_type),
                key,
                state: EntityState::Unchanged,
                original_values,
            },
        );
        instance
    }

    /// Returns the tracked instance for an identity, if any.
    #[must_use]
    pub fn get(&self, entity_type: &str, key: &KeyValue) -> Option<EntityRef> {
        self.entries
            .get(&(String::from(entity_type), key.clone()))
            .map(|e| Rc::clone(&e.instance))
    }

    /// Returns the lifecycle state of an identity; [`EntityState::Detached`]
    /// when the scope does not track it.
    #[must_use]
    pub fn state_of(&self, entity_type: &str, key: &KeyValue) -> EntityState {
        self.entries
            .get(&(String::from(entity_type), key.clone()))
            .map_or(EntityState::Detached, |e| e.state)
    }

    /// Registers a new entity as [`EntityState::Added`]. New entities have
    /// no originals: everything is pending insertion.
    pub fn add(&mut self, entity_type: &str, key: KeyValue, data: EntityData) -> EntityRef {
        let instance = Rc::new(RefCell::new(data));
        self.entries.insert(
            (String::from(entity_type), key.clone()),
            TrackedEntry {
                instance: Rc::clone(&instance),
                entity_type: String::from(entity_type),
                key,
                state: EntityState::Added,
                original_values: BTreeMap::new(),
            },
        );
        instance
    }

    /// Writes a property through the scope, updating the instance and the
    /// change state. Originals are untouched, so the pre-change value stays
    /// available for update statements and concurrency checks.
    pub fn set_property(&mut self, entity_type: &str, key: &KeyValue, property: &str, value: Value) {
        let Some(entry) = self
            .entries
            .get_mut(&(String::from(entity_type), key.clone()))
        else {
            return;
        };
        entry
            .instance
            .borrow_mut()
            .values
            .insert(String::from(property), value);
        if entry.state == EntityState::Unchanged {
            entry.state = EntityState::Modified;
        }
    }

    /// Marks an identity for deletion. An entity that was only ever Added
    /// is simply dropped; it has nothing to delete in the store.
    pub fn mark_deleted(&mut self, entity_type: &str, key: &KeyValue) {
        let map_key = (String::from(entity_type), key.clone());
        match self.entries.get_mut(&map_key) {
            Some(entry) if entry.state == EntityState::Added => {
                self.entries.remove(&map_key);
            }
            Some(entry) => entry.state = EntityState::Deleted,
            None => {}
        }
    }

    /// Stops tracking an identity, returning the instance if it was tracked.
    pub fn detach(&mut self, entity_type: &str, key: &KeyValue) -> Option<EntityRef> {
        self.entries
            .remove(&(String::from(entity_type), key.clone()))
            .map(|e| e.instance)
    }

    /// Transitions the scope past a successful save: Added and Modified
    /// entries become Unchanged with fresh originals, Deleted entries leave
    /// the scope.
    pub fn accept_changes(&mut self) {
        self.entries
            .retain(|_, entry| entry.state != EntityState::Deleted);
        for entry in self.entries.values_mut() {
            if matches!(entry.state, EntityState::Added | EntityState::Modified) {
                entry.state = EntityState::Unchanged;
                entry.original_values = entry.instance.borrow().values.clone();
            }
        }
    }

    /// Iterates all tracked entries.
    pub fn entries(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values()
    }

    /// Iterates entries with pending changes.
    pub fn changed(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries
            .values()
            .filter(|e| e.state != EntityState::Unchanged)
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the scope tracks nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
