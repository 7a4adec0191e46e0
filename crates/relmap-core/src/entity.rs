//! Entity instances and shared entity handles.
//!
//! An [`Entity`] is a dynamic domain object: scalar values by field name,
//! single-valued references by navigation name and collections by list-field
//! name. Entities are shared through [`EntityRef`] (`Arc<RwLock<Entity>>`) so
//! that cyclic graphs and reference identity can be expressed.
//!
//! # Lock discipline
//!
//! Never hold a guard on one entity while locking another. Clone the
//! neighbouring `EntityRef`s out of a guard, drop it, then recurse. A
//! self-referencing entity would otherwise deadlock on its own lock.

use crate::change_tracker::{ChangeTracker, FieldChange};
use crate::schema::{DELETED_FIELD, VERSION_FIELD};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read guard for an entity.
pub type EntityReadGuard<'a> = RwLockReadGuard<'a, Entity>;

/// Write guard for an entity.
pub type EntityWriteGuard<'a> = RwLockWriteGuard<'a, Entity>;

/// Value of a single-valued navigation.
#[derive(Debug, Clone)]
pub enum Reference {
    /// Only the foreign key is known.
    Id(i64),
    /// The referenced entity is loaded.
    Entity(EntityRef),
}

impl Reference {
    /// Foreign-key value. A loaded entity that has not been saved yet
    /// reports 0.
    pub fn id(&self) -> i64 {
        match self {
            Reference::Id(id) => *id,
            Reference::Entity(e) => e.id(),
        }
    }

    /// Foreign-key value without blocking; `None` if the target is
    /// currently locked.
    pub fn try_id(&self) -> Option<i64> {
        match self {
            Reference::Id(id) => Some(*id),
            Reference::Entity(e) => e.0.try_read().ok().map(|g| g.id),
        }
    }

    /// Same target: equal ids, or the same loaded instance.
    pub fn same_target(&self, other: &Reference) -> bool {
        match (self, other) {
            (Reference::Id(a), Reference::Id(b)) => a == b,
            (Reference::Entity(a), Reference::Entity(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Reference::Entity(e) => Some(e),
            Reference::Id(_) => None,
        }
    }
}

/// A dynamic domain object.
#[derive(Default)]
pub struct Entity {
    entity_type: &'static str,
    pub id: i64,
    pub deleted: bool,
    pub version: i64,
    pub evicted: bool,
    values: HashMap<String, Value>,
    references: HashMap<String, Reference>,
    collections: HashMap<String, Vec<EntityRef>>,
    changes: ChangeTracker,
}

impl Entity {
    /// Create a transient entity (Id 0).
    pub fn new(entity_type: &'static str) -> Self {
        Self {
            entity_type,
            ..Self::default()
        }
    }

    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// Whether the entity has never been persisted.
    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    /// Scalar value of `field`, `Value::Null` when unset.
    pub fn get(&self, field: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(field).unwrap_or(NULL)
    }

    /// Assign a scalar value, recording the change.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        let value = value.into();
        let old = self
            .values
            .insert(field.to_string(), value.clone())
            .unwrap_or(Value::Null);
        self.changes.record(field, old, value);
    }

    /// Assign a scalar value without recording a change (materialization).
    pub fn load(&mut self, field: &str, value: Value) {
        self.values.insert(field.to_string(), value);
    }

    pub fn reference(&self, nav: &str) -> Option<&Reference> {
        self.references.get(nav)
    }

    /// Assign a navigation, recording the foreign-key change.
    ///
    /// The target may be this entity itself, so its id is read without
    /// blocking.
    pub fn set_reference(&mut self, nav: &str, target: Option<Reference>) {
        let unchanged = match (self.references.get(nav), &target) {
            (Some(a), Some(b)) => a.same_target(b),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            let fk = |r: Option<&Reference>| {
                r.and_then(Reference::try_id).map_or(Value::Null, Value::BigInt)
            };
            let old = fk(self.references.get(nav));
            let new = fk(target.as_ref());
            self.changes.push(FieldChange {
                field: nav.to_string(),
                old,
                new,
            });
        }
        match target {
            Some(r) => self.references.insert(nav.to_string(), r),
            None => self.references.remove(nav),
        };
    }

    /// Assign a navigation without recording a change (materialization).
    pub fn load_reference(&mut self, nav: &str, target: Option<Reference>) {
        match target {
            Some(r) => self.references.insert(nav.to_string(), r),
            None => self.references.remove(nav),
        };
    }

    /// Loaded entities referenced through single-valued navigations.
    pub fn loaded_references(&self) -> impl Iterator<Item = (&str, &EntityRef)> {
        self.references
            .iter()
            .filter_map(|(k, r)| r.as_entity().map(|e| (k.as_str(), e)))
    }

    pub fn collection(&self, list: &str) -> &[EntityRef] {
        self.collections.get(list).map_or(&[], Vec::as_slice)
    }

    /// Append to a collection navigation.
    pub fn push_to(&mut self, list: &str, item: EntityRef) {
        self.collections.entry(list.to_string()).or_default().push(item);
    }

    pub fn set_collection(&mut self, list: &str, items: Vec<EntityRef>) {
        self.collections.insert(list.to_string(), items);
    }

    /// Mark as soft-deleted, recording the change.
    pub fn mark_deleted(&mut self) {
        if !self.deleted {
            self.deleted = true;
            self.changes
                .record(DELETED_FIELD, Value::Bool(false), Value::Bool(true));
        }
    }

    /// Bump the version counter after a successful update.
    pub fn increment_version(&mut self) {
        self.version += 1;
        tracing::trace!(
            entity = self.entity_type,
            id = self.id,
            version = self.version,
            "Incremented {}",
            VERSION_FIELD
        );
    }

    pub fn changes(&self) -> &ChangeTracker {
        &self.changes
    }

    pub fn changes_mut(&mut self) -> &mut ChangeTracker {
        &mut self.changes
    }

    /// Whether this entity needs writing under intelligent flushing.
    pub fn is_dirty(&self) -> bool {
        self.is_new() || self.changes.has_changes()
    }
}

impl fmt::Debug for Entity {
    // Neighbours are printed by id only so that cycles terminate.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let refs: HashMap<&str, i64> = self
            .references
            .iter()
            .map(|(k, r)| (k.as_str(), r.try_id().unwrap_or(self.id)))
            .collect();
        f.debug_struct("Entity")
            .field("type", &self.entity_type)
            .field("id", &self.id)
            .field("deleted", &self.deleted)
            .field("version", &self.version)
            .field("values", &self.values)
            .field("references", &refs)
            .finish_non_exhaustive()
    }
}

/// Shared handle to an entity. Equality is reference identity.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Entity>>);

impl EntityRef {
    pub fn new(entity: Entity) -> Self {
        Self(Arc::new(RwLock::new(entity)))
    }

    /// Acquire a read guard, recovering from poisoning.
    pub fn read(&self) -> EntityReadGuard<'_> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire a write guard, recovering from poisoning.
    pub fn write(&self) -> EntityWriteGuard<'_> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Stable address used as a visited-set key.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn id(&self) -> i64 {
        self.read().id
    }

    pub fn entity_type(&self) -> &'static str {
        self.read().entity_type
    }

    pub fn is_deleted(&self) -> bool {
        self.read().deleted
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for EntityRef {}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(e) => write!(f, "EntityRef({} #{})", e.entity_type, e.id),
            Err(_) => write!(f, "EntityRef(<locked>)"),
        }
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::new(entity)
    }
}
