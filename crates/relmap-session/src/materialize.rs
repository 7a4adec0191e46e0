//! Row to entity materialization.

use relmap_core::{DELETED_FIELD, Entity, EntitySchema, ID_FIELD, Reference, Result, Row, VERSION_FIELD, Value};

/// Build an entity from a row selected with the schema's column list.
///
/// Navigations are loaded as bare foreign keys; nothing is recorded in the
/// change log. Missing field columns load as `Value::Null`.
pub(crate) fn materialize(schema: &EntitySchema, row: &Row) -> Result<Entity> {
    let mut entity = Entity::new(schema.name);
    entity.id = row.get_named::<i64>(ID_FIELD)?;
    entity.deleted = row
        .get_by_name(DELETED_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    entity.version = row
        .get_by_name(VERSION_FIELD)
        .and_then(Value::as_i64)
        .unwrap_or(0);

    for field in &schema.fields {
        let value = row
            .get_by_name(field.column_name)
            .cloned()
            .unwrap_or(Value::Null);
        if field.is_navigation() {
            let target = value.as_i64().map(Reference::Id);
            entity.load_reference(field.name, target);
        } else {
            entity.load(field.name, value);
        }
    }
    Ok(entity)
}
