//! Flush planning and execution.
//!
//! A [`FlushPlan`] orders pending entities so that every loaded foreign-key
//! parent is written before its children. Within a reference cycle the
//! child that is reached first is inserted with a NULL foreign key, and a
//! fix-up UPDATE sets it once the parent has its generated id.

use relmap_core::{
    Command, ConcurrencyError, Connection, EntityRef, Error, Reference, Result, SchemaRegistry,
    Value,
};
use relmap_query::{WriteImage, fk_fixup_command, insert_command, update_command};
use std::collections::HashSet;

/// Log a statement before it reaches the connection.
pub(crate) fn log_command(cmd: &Command, statement_log: bool) {
    if statement_log {
        tracing::debug!(sql = %cmd.text, params = ?cmd.values(), "Executing statement");
    } else {
        tracing::trace!(sql = %cmd.text, "Executing statement");
    }
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushResult {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated, soft deletes excluded.
    pub updated: usize,
    /// Rows soft-deleted.
    pub deleted: usize,
    /// Foreign keys set after a cyclic insert.
    pub fixups: usize,
}

impl FlushResult {
    /// Number of entities written.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// A foreign key that could not be bound at insert time.
#[derive(Debug)]
struct Fixup {
    entity: EntityRef,
    field: &'static str,
    target: EntityRef,
}

/// Field source captured under one read guard.
enum Source {
    Value(Value),
    Reference(Option<Reference>),
}

/// Pending entities in write order.
#[derive(Debug, Default)]
pub struct FlushPlan {
    order: Vec<EntityRef>,
}

impl FlushPlan {
    /// Order `entities` parents first.
    ///
    /// Only references between members of `entities` constrain the order.
    pub fn new(entities: &[EntityRef]) -> Self {
        let members: HashSet<usize> = entities.iter().map(EntityRef::addr).collect();
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(entities.len());
        for entity in entities {
            visit(entity, &members, &mut seen, &mut order);
        }
        Self { order }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn entities(&self) -> &[EntityRef] {
        &self.order
    }

    /// Write every entity in order, then apply foreign-key fix-ups.
    ///
    /// Stops at the first failing statement. Entities written before the
    /// failure keep their new ids and versions; the surrounding transaction
    /// decides whether the rows survive.
    #[tracing::instrument(level = "debug", skip_all, fields(entities = self.order.len()))]
    pub fn execute<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        registry: &SchemaRegistry,
        statement_log: bool,
    ) -> Result<FlushResult> {
        let start = std::time::Instant::now();
        let mut result = FlushResult::default();
        let mut fixups = Vec::new();

        for entity in &self.order {
            write_entity(conn, registry, entity, statement_log, &mut fixups, &mut result)?;
        }

        for fixup in fixups {
            let fk = fixup.target.id();
            if fk == 0 {
                tracing::warn!(
                    entity = ?fixup.entity,
                    field = fixup.field,
                    "Referenced entity was not written; foreign key left NULL"
                );
                continue;
            }
            let schema = registry.require(fixup.entity.entity_type())?;
            let field = schema.get_field(fixup.field).ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "{} has no field '{}'",
                    schema.name, fixup.field
                ))
            })?;
            let cmd = fk_fixup_command(schema, field, fixup.entity.id(), fk);
            log_command(&cmd, statement_log);
            conn.execute_non_query(&cmd)?;
            result.fixups += 1;
        }

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis(),
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            fixups = result.fixups,
            "Flush complete"
        );
        Ok(result)
    }
}

/// Post-order walk over loaded references.
///
/// An entity is marked before its parents are visited, so a back edge in a
/// cycle is skipped and the cycle is broken at that point.
fn visit(
    entity: &EntityRef,
    members: &HashSet<usize>,
    seen: &mut HashSet<usize>,
    order: &mut Vec<EntityRef>,
) {
    if !members.contains(&entity.addr()) || !seen.insert(entity.addr()) {
        return;
    }
    let mut parents: Vec<(String, EntityRef)> = entity
        .read()
        .loaded_references()
        .map(|(nav, target)| (nav.to_string(), target.clone()))
        .collect();
    parents.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, parent) in &parents {
        visit(parent, members, seen, order);
    }
    order.push(entity.clone());
}

fn write_entity<C: Connection + ?Sized>(
    conn: &mut C,
    registry: &SchemaRegistry,
    entity: &EntityRef,
    statement_log: bool,
    fixups: &mut Vec<Fixup>,
    result: &mut FlushResult,
) -> Result<()> {
    let schema = registry.require(entity.entity_type())?;
    let (id, version, deleted, sources) = {
        let guard = entity.read();
        let sources: Vec<Source> = schema
            .fields
            .iter()
            .map(|f| {
                if f.is_navigation() {
                    Source::Reference(guard.reference(f.name).cloned())
                } else {
                    Source::Value(guard.get(f.name).clone())
                }
            })
            .collect();
        (guard.id, guard.version, guard.deleted, sources)
    };

    if id == 0 && deleted {
        tracing::trace!(entity = ?entity, "Skipping transient deleted entity");
        entity.write().changes_mut().accept();
        return Ok(());
    }

    let mut values = Vec::with_capacity(sources.len());
    for (field, source) in schema.fields.iter().zip(sources) {
        let value = match source {
            Source::Value(v) => v,
            Source::Reference(None) => Value::Null,
            Source::Reference(Some(Reference::Id(fk))) => Value::BigInt(fk),
            Source::Reference(Some(Reference::Entity(target))) => {
                let fk = target.id();
                if fk == 0 {
                    fixups.push(Fixup {
                        entity: entity.clone(),
                        field: field.name,
                        target,
                    });
                    Value::Null
                } else {
                    Value::BigInt(fk)
                }
            }
        };
        values.push(value);
    }

    if id == 0 {
        let image = WriteImage {
            id,
            version: version + 1,
            deleted,
            values,
        };
        let cmd = insert_command(schema, &image, conn.dialect());
        log_command(&cmd, statement_log);
        let new_id = conn.execute_insert(&cmd)?;
        let mut guard = entity.write();
        guard.id = new_id;
        guard.increment_version();
        guard.changes_mut().accept();
        tracing::debug!(entity = schema.name, id = new_id, "Inserted entity");
        result.inserted += 1;
    } else {
        let image = WriteImage {
            id,
            version,
            deleted,
            values,
        };
        let cmd = update_command(schema, &image);
        log_command(&cmd, statement_log);
        let affected = conn.execute_non_query(&cmd)?;
        if affected == 0 {
            tracing::debug!(
                entity = schema.name,
                id,
                version,
                "Optimistic update matched no row"
            );
            return Err(Error::Concurrency(ConcurrencyError {
                entity: schema.name.to_string(),
                id,
                expected_version: version,
            }));
        }
        let mut guard = entity.write();
        guard.increment_version();
        guard.changes_mut().accept();
        if deleted {
            result.deleted += 1;
        } else {
            result.updated += 1;
        }
    }
    Ok(())
}
