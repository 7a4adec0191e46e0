//! Cascade resolution.
//!
//! Computes the set of entities reachable from a root through navigations
//! whose cascade policy covers a threshold. Traversal keeps a visited set
//! keyed by instance address, so cyclic and diamond-shaped graphs visit each
//! entity once.

use relmap_core::{Cascade, EntityRef, Result, SchemaRegistry};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy)]
pub struct CascadeResolver<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> CascadeResolver<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// The root plus everything reachable at `threshold`, in discovery order.
    #[tracing::instrument(level = "trace", skip_all, fields(threshold = ?threshold))]
    pub fn closure(&self, root: &EntityRef, threshold: Cascade) -> Result<Vec<EntityRef>> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![root.clone()];

        while let Some(entity) = stack.pop() {
            if !visited.insert(entity.addr()) {
                continue;
            }
            let neighbours = self.neighbours(&entity, threshold)?;
            tracing::trace!(
                entity = ?entity,
                neighbours = neighbours.len(),
                "Cascade visit"
            );
            out.push(entity);
            // Reverse so the first declared navigation is visited first.
            for next in neighbours.into_iter().rev() {
                if !visited.contains(&next.addr()) {
                    stack.push(next);
                }
            }
        }
        Ok(out)
    }

    /// Cascading neighbours, cloned out so no guard outlives this call.
    fn neighbours(&self, entity: &EntityRef, threshold: Cascade) -> Result<Vec<EntityRef>> {
        let guard = entity.read();
        let schema = self.registry.require(guard.entity_type())?;
        let mut next = Vec::new();
        for nav in schema.navigations() {
            if !nav.cascade.covers(threshold) {
                continue;
            }
            if let Some(target) = guard.reference(nav.name).and_then(|r| r.as_entity()) {
                next.push(target.clone());
            }
        }
        for list in &schema.list_fields {
            if list.cascade.covers(threshold) {
                next.extend(guard.collection(list.name).iter().cloned());
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{Entity, EntitySchema, FieldInfo, ListFieldInfo, Reference, SqlType};

    fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        r.register(
            EntitySchema::new("Artist")
                .field(FieldInfo::new("Alias", "Alias", SqlType::Text))
                .field(
                    FieldInfo::reference("AnotherArtist", "AnotherArtist", "Artist")
                        .cascade(Cascade::Save),
                )
                .field(
                    FieldInfo::reference("Label", "LabelId", "Label").cascade(Cascade::SaveDelete),
                )
                .field(FieldInfo::reference("Agent", "AgentId", "Artist")),
        )
        .unwrap();
        r.register(
            EntitySchema::new("Label")
                .field(FieldInfo::new("Name", "Name", SqlType::Text))
                .list_field(
                    ListFieldInfo::new("Artists", "Artist", "Label").cascade(Cascade::SaveDelete),
                ),
        )
        .unwrap();
        r
    }

    fn new(entity_type: &'static str) -> EntityRef {
        EntityRef::new(Entity::new(entity_type))
    }

    fn link(from: &EntityRef, nav: &str, to: &EntityRef) {
        from.write()
            .set_reference(nav, Some(Reference::Entity(to.clone())));
    }

    #[test]
    fn cycle_terminates_with_each_entity_once() {
        let registry = registry();
        let a = new("Artist");
        let b = new("Artist");
        link(&a, "AnotherArtist", &b);
        link(&b, "AnotherArtist", &a);
        let closure = CascadeResolver::new(&registry)
            .closure(&a, Cascade::Save)
            .unwrap();
        assert_eq!(closure.len(), 2);
        assert!(closure[0].ptr_eq(&a));
        assert!(closure[1].ptr_eq(&b));
    }

    #[test]
    fn self_reference_is_included_once() {
        let registry = registry();
        let a = new("Artist");
        link(&a, "AnotherArtist", &a);
        let closure = CascadeResolver::new(&registry)
            .closure(&a, Cascade::Save)
            .unwrap();
        assert_eq!(closure.len(), 1);
    }

    #[test]
    fn threshold_filters_navigations() {
        let registry = registry();
        let a = new("Artist");
        let other = new("Artist");
        let label = new("Label");
        let agent = new("Artist");
        link(&a, "AnotherArtist", &other);
        link(&a, "Label", &label);
        link(&a, "Agent", &agent);

        let resolver = CascadeResolver::new(&registry);
        let save = resolver.closure(&a, Cascade::Save).unwrap();
        assert_eq!(save.len(), 3);
        assert!(!save.iter().any(|e| e.ptr_eq(&agent)));

        let delete = resolver.closure(&a, Cascade::SaveDelete).unwrap();
        assert_eq!(delete.len(), 2);
        assert!(delete.iter().any(|e| e.ptr_eq(&label)));
        assert!(!delete.iter().any(|e| e.ptr_eq(&other)));
    }

    #[test]
    fn diamond_through_collection() {
        let registry = registry();
        let label = new("Label");
        let a = new("Artist");
        let b = new("Artist");
        link(&a, "Label", &label);
        link(&b, "Label", &label);
        {
            let mut l = label.write();
            l.push_to("Artists", a.clone());
            l.push_to("Artists", b.clone());
        }
        let closure = CascadeResolver::new(&registry)
            .closure(&a, Cascade::SaveDelete)
            .unwrap();
        assert_eq!(closure.len(), 3);
    }

    #[test]
    fn unregistered_entity_fails() {
        let registry = registry();
        let x = new("Nope");
        assert!(CascadeResolver::new(&registry)
            .closure(&x, Cascade::Save)
            .is_err());
    }
}
