//! Identity map: one live instance per (entity type, id) per session.
//!
//! Buckets are keyed by entity type. Membership is by reference identity;
//! lookups by id skip entries that are marked deleted.

use relmap_core::EntityRef;
use std::collections::HashMap;

/// Outcome of [`Cache::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheInsert {
    /// The entity was added.
    Inserted,
    /// This very instance was already cached.
    Present,
    /// Another live instance already holds this (type, id).
    Conflict(EntityRef),
}

/// Per-session identity map.
#[derive(Debug, Default)]
pub struct Cache {
    buckets: HashMap<&'static str, Vec<EntityRef>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity unless it, or another live instance with the same id,
    /// is already present.
    pub fn insert(&mut self, entity: &EntityRef) -> CacheInsert {
        let (entity_type, id) = {
            let e = entity.read();
            (e.entity_type(), e.id)
        };
        let bucket = self.buckets.entry(entity_type).or_default();
        if bucket.iter().any(|e| e.ptr_eq(entity)) {
            return CacheInsert::Present;
        }
        if id != 0 {
            if let Some(existing) = bucket.iter().find(|e| e.id() == id && !e.is_deleted()) {
                return CacheInsert::Conflict(existing.clone());
            }
        }
        tracing::trace!(entity = entity_type, id, "Cached entity");
        bucket.push(entity.clone());
        CacheInsert::Inserted
    }

    /// Live (non-deleted) instance for `(entity_type, id)`.
    pub fn get(&self, entity_type: &str, id: i64) -> Option<EntityRef> {
        let found = self.buckets.get(entity_type).and_then(|bucket| {
            bucket
                .iter()
                .find(|e| {
                    let e = e.read();
                    e.id == id && !e.deleted
                })
                .cloned()
        });
        tracing::trace!(
            entity = entity_type,
            id,
            hit = found.is_some(),
            "Cache lookup"
        );
        found
    }

    /// Remove the live instance for `(entity_type, id)`.
    pub fn remove(&mut self, entity_type: &str, id: i64) -> Option<EntityRef> {
        let bucket = self.buckets.get_mut(entity_type)?;
        let pos = bucket.iter().position(|e| {
            let e = e.read();
            e.id == id && !e.deleted
        })?;
        Some(bucket.remove(pos))
    }

    /// Remove this instance, whatever its state.
    pub fn remove_entity(&mut self, entity: &EntityRef) -> bool {
        let entity_type = entity.entity_type();
        let Some(bucket) = self.buckets.get_mut(entity_type) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|e| !e.ptr_eq(entity));
        bucket.len() != before
    }

    pub fn contains(&self, entity: &EntityRef) -> bool {
        let entity_type = entity.entity_type();
        self.buckets
            .get(entity_type)
            .is_some_and(|bucket| bucket.iter().any(|e| e.ptr_eq(entity)))
    }

    /// Mark every entry evicted and empty all buckets.
    pub fn clear(&mut self) {
        let mut evicted = 0usize;
        for (_, bucket) in self.buckets.drain() {
            for entity in bucket {
                entity.write().evicted = true;
                evicted += 1;
            }
        }
        tracing::debug!(evicted, "Cleared session cache");
    }

    /// All cached entities, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRef> {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
