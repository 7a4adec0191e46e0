//! Write commands: INSERT, optimistic UPDATE, foreign-key fix-ups and
//! SELECT-by-id.

use crate::compiler::{select_list, system_field_type};
use relmap_core::{
    Command, DELETED_FIELD, Dialect, EntitySchema, FieldInfo, ID_FIELD, ParameterSet,
    VERSION_FIELD, Value,
};

/// Column values of one entity, aligned with `EntitySchema::fields`.
///
/// Navigation fields carry the foreign-key id, or `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteImage {
    pub id: i64,
    pub version: i64,
    pub deleted: bool,
    pub values: Vec<Value>,
}

fn bind_field(params: &mut ParameterSet, field: &FieldInfo, value: &Value) -> String {
    params.bind(value.clone(), field.sql_type, field.nullable())
}

fn bind_system(params: &mut ParameterSet, name: &str, value: Value) -> String {
    params.bind(value, system_field_type(name), false)
}

/// `INSERT INTO t (Deleted, Version, ...) VALUES (...)` plus the dialect's
/// generated-key clause.
pub fn insert_command(schema: &EntitySchema, image: &WriteImage, dialect: &dyn Dialect) -> Command {
    let mut params = ParameterSet::new();
    let mut columns = vec![DELETED_FIELD, VERSION_FIELD];
    let mut placeholders = vec![
        bind_system(&mut params, DELETED_FIELD, Value::Bool(image.deleted)),
        bind_system(&mut params, VERSION_FIELD, Value::BigInt(image.version)),
    ];
    for (field, value) in schema.fields.iter().zip(&image.values) {
        columns.push(field.column_name);
        placeholders.push(bind_field(&mut params, field, value));
    }
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}){}",
        schema.table,
        columns.join(", "),
        placeholders.join(", "),
        dialect.generated_key_clause()
    );
    Command::with_parameters(sql, params.into_vec())
}

/// Optimistic UPDATE: writes every column, bumps Version, and matches on the
/// previous Version. Zero affected rows means a concurrent modification.
pub fn update_command(schema: &EntitySchema, image: &WriteImage) -> Command {
    let mut params = ParameterSet::new();
    let mut sets = vec![
        format!(
            "{} = {}",
            DELETED_FIELD,
            bind_system(&mut params, DELETED_FIELD, Value::Bool(image.deleted))
        ),
        format!(
            "{} = {}",
            VERSION_FIELD,
            bind_system(&mut params, VERSION_FIELD, Value::BigInt(image.version + 1))
        ),
    ];
    for (field, value) in schema.fields.iter().zip(&image.values) {
        sets.push(format!(
            "{} = {}",
            field.column_name,
            bind_field(&mut params, field, value)
        ));
    }
    let id = bind_system(&mut params, ID_FIELD, Value::BigInt(image.id));
    let version = bind_system(&mut params, VERSION_FIELD, Value::BigInt(image.version));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {} AND {} = {}",
        schema.table,
        sets.join(", "),
        ID_FIELD,
        id,
        VERSION_FIELD,
        version
    );
    Command::with_parameters(sql, params.into_vec())
}

/// Set one foreign key after the referenced row got its id.
pub fn fk_fixup_command(schema: &EntitySchema, field: &FieldInfo, id: i64, fk: i64) -> Command {
    let mut params = ParameterSet::new();
    let value = bind_field(&mut params, field, &Value::BigInt(fk));
    let id = bind_system(&mut params, ID_FIELD, Value::BigInt(id));
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} = {}",
        schema.table, field.column_name, value, ID_FIELD, id
    );
    Command::with_parameters(sql, params.into_vec())
}

/// `SELECT ... FROM t alias WHERE alias.Id = @p1`
pub fn select_by_id_command(schema: &EntitySchema, id: i64) -> Command {
    let alias = schema.alias();
    let mut params = ParameterSet::new();
    let ph = bind_system(&mut params, ID_FIELD, Value::BigInt(id));
    let sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} = {}",
        select_list(schema, &alias),
        schema.table,
        alias,
        alias,
        ID_FIELD,
        ph
    );
    Command::with_parameters(sql, params.into_vec())
}
