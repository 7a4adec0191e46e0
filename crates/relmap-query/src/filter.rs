//! Global query filters.
//!
//! A [`FilterCatalog`] holds predicates that are applied automatically to
//! every query against an entity type. It is shared across sessions through
//! `Arc` and is meant to be populated at configuration time.

use crate::condition::{Predicate, QueryConditionGroup};
use relmap_core::{Error, QueryErrorKind, Result};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A registered filter: one AND-ed group for one entity type.
#[derive(Debug, Clone)]
pub struct GlobalQueryFilter {
    pub entity_type: &'static str,
    pub group: QueryConditionGroup,
}

/// Process-wide registry of global filters.
///
/// Every registration or clear bumps a generation counter, which compiled
/// queries compare against to decide whether to recompile.
#[derive(Debug, Default)]
pub struct FilterCatalog {
    filters: RwLock<Vec<GlobalQueryFilter>>,
    generation: AtomicU64,
}

impl FilterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter for `entity_type`.
    ///
    /// The predicate must lower to a single conjunction; every condition must
    /// be declared against `entity_type`.
    #[tracing::instrument(level = "debug", skip(self, predicate))]
    pub fn register(&self, entity_type: &'static str, predicate: Predicate) -> Result<()> {
        let mut groups = predicate.lower()?;
        if groups.len() != 1 {
            return Err(Error::query(
                QueryErrorKind::Malformed,
                format!(
                    "a global filter for '{}' must be a single conjunction, got {} groups",
                    entity_type,
                    groups.len()
                ),
            ));
        }
        let group = groups.remove(0);
        if let Some(c) = group
            .conditions()
            .iter()
            .find(|c| c.entity_type != entity_type)
        {
            return Err(Error::query(
                QueryErrorKind::EntityMismatch,
                format!(
                    "filter for '{}' has a condition declared on '{}'",
                    entity_type, c.entity_type
                ),
            ));
        }

        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        filters.push(GlobalQueryFilter { entity_type, group });
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            entity = entity_type,
            generation,
            total = filters.len(),
            "Registered global query filter"
        );
        Ok(())
    }

    /// Remove every filter.
    pub fn clear(&self) {
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        filters.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Cleared global query filters");
    }

    /// Remove the filters registered for one entity type.
    pub fn clear_for(&self, entity_type: &str) {
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        let before = filters.len();
        filters.retain(|f| f.entity_type != entity_type);
        if filters.len() != before {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Filter groups for `entity_type`, in registration order.
    pub fn groups_for(&self, entity_type: &str) -> Vec<QueryConditionGroup> {
        let filters = self.filters.read().unwrap_or_else(|e| e.into_inner());
        filters
            .iter()
            .filter(|f| f.entity_type == entity_type)
            .map(|f| f.group.clone())
            .collect()
    }

    /// Current generation; changes whenever the catalog changes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.filters.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
