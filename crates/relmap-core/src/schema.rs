//! Entity schema: per-type mapping metadata.
//!
//! Schemas are plain data, registered once at startup into a
//! [`SchemaRegistry`] and shared read-only by the query compiler, the cascade
//! resolver and every session.

use crate::error::{Error, QueryErrorKind, Result, SchemaErrorKind};
use crate::identifiers::is_valid_identifier;
use crate::types::SqlType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the identity field present on every entity.
pub const ID_FIELD: &str = "Id";
/// Name of the soft-delete flag present on every entity.
pub const DELETED_FIELD: &str = "Deleted";
/// Name of the optimistic concurrency counter present on every entity.
pub const VERSION_FIELD: &str = "Version";

const SYSTEM_FIELDS: [&str; 3] = [ID_FIELD, DELETED_FIELD, VERSION_FIELD];

/// Per-field cascade policy.
///
/// Ordered so that `SaveDelete` covers `Save`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Cascade {
    #[default]
    None,
    Save,
    SaveDelete,
}

impl Cascade {
    /// Does a field with this policy participate in a cascade at `threshold`?
    pub fn covers(self, threshold: Cascade) -> bool {
        threshold != Cascade::None && self >= threshold
    }
}

/// Metadata about a mapped field.
///
/// A field with `references` set is a single-valued navigation; its column
/// holds the foreign key.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Property name used in condition paths
    pub name: &'static str,
    /// Database column name
    pub column_name: &'static str,
    pub sql_type: SqlType,
    /// Whether a value is required (NOT NULL)
    pub mandatory: bool,
    pub unique: bool,
    /// Maximum length for text columns
    pub max_length: Option<u32>,
    /// Precision for DECIMAL types (total digits)
    pub precision: Option<u8>,
    /// Scale for DECIMAL types (digits after decimal point)
    pub scale: Option<u8>,
    pub cascade: Cascade,
    /// Target entity type when this field is a foreign-key navigation
    pub references: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new scalar field.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            mandatory: false,
            unique: false,
            max_length: sql_type.max_length(),
            precision: None,
            scale: None,
            cascade: Cascade::None,
            references: None,
        }
    }

    /// Create a single-valued navigation to `target`, stored in `column_name`.
    pub const fn reference(
        name: &'static str,
        column_name: &'static str,
        target: &'static str,
    ) -> Self {
        let mut field = Self::new(name, column_name, SqlType::BigInt);
        field.references = Some(target);
        field
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    pub const fn mandatory(mut self, value: bool) -> Self {
        self.mandatory = value;
        self
    }

    pub const fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub const fn max_length(mut self, value: u32) -> Self {
        self.max_length = Some(value);
        self
    }

    /// Set both precision and scale for DECIMAL types.
    pub const fn decimal_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub const fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    /// Is this field a foreign-key navigation?
    pub const fn is_navigation(&self) -> bool {
        self.references.is_some()
    }

    /// Whether the column accepts NULL.
    pub const fn nullable(&self) -> bool {
        !self.mandatory
    }
}

/// A collection navigation: the entities of `target` whose
/// `reference_field` points back at the owner.
#[derive(Debug, Clone)]
pub struct ListFieldInfo {
    pub name: &'static str,
    pub target: &'static str,
    pub reference_field: &'static str,
    pub cascade: Cascade,
}

impl ListFieldInfo {
    pub const fn new(
        name: &'static str,
        target: &'static str,
        reference_field: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            reference_field,
            cascade: Cascade::None,
        }
    }

    pub const fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }
}

/// A computed property that is never persisted nor queried.
#[derive(Debug, Clone)]
pub struct VirtualFieldInfo {
    pub name: &'static str,
    pub sql_type: SqlType,
}

impl VirtualFieldInfo {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self { name, sql_type }
    }
}

/// Field resolved by name on an [`EntitySchema`].
#[derive(Debug, Clone, Copy)]
pub enum FieldRef<'a> {
    /// `Id`, `Deleted` or `Version`
    System(&'static str),
    Field(&'a FieldInfo),
    List(&'a ListFieldInfo),
    Virtual(&'a VirtualFieldInfo),
}

/// Mapping metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: Vec<FieldInfo>,
    pub list_fields: Vec<ListFieldInfo>,
    pub virtual_fields: Vec<VirtualFieldInfo>,
}

impl EntitySchema {
    /// Create a schema whose table name equals the entity name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            table: name,
            fields: Vec::new(),
            list_fields: Vec::new(),
            virtual_fields: Vec::new(),
        }
    }

    pub fn table(mut self, table: &'static str) -> Self {
        self.table = table;
        self
    }

    pub fn field(mut self, field: FieldInfo) -> Self {
        self.fields.push(field);
        self
    }

    pub fn list_field(mut self, field: ListFieldInfo) -> Self {
        self.list_fields.push(field);
        self
    }

    pub fn virtual_field(mut self, field: VirtualFieldInfo) -> Self {
        self.virtual_fields.push(field);
        self
    }

    /// Lowercased table name, used as the root alias in compiled queries.
    pub fn alias(&self) -> String {
        self.table.to_lowercase()
    }

    /// Resolve a property name.
    pub fn resolve(&self, name: &str) -> Option<FieldRef<'_>> {
        if let Some(sys) = SYSTEM_FIELDS.iter().find(|s| **s == name) {
            return Some(FieldRef::System(sys));
        }
        if let Some(f) = self.fields.iter().find(|f| f.name == name) {
            return Some(FieldRef::Field(f));
        }
        if let Some(l) = self.list_fields.iter().find(|l| l.name == name) {
            return Some(FieldRef::List(l));
        }
        self.virtual_fields
            .iter()
            .find(|v| v.name == name)
            .map(FieldRef::Virtual)
    }

    /// Look up a declared (non-system) field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_list_field(&self, name: &str) -> Option<&ListFieldInfo> {
        self.list_fields.iter().find(|l| l.name == name)
    }

    /// Iterate over declared navigation fields.
    pub fn navigations(&self) -> impl Iterator<Item = &FieldInfo> {
        self.fields.iter().filter(|f| f.is_navigation())
    }

    /// Mapped columns in select order: system columns, then declared fields.
    pub fn columns(&self) -> Vec<&'static str> {
        SYSTEM_FIELDS
            .iter()
            .copied()
            .chain(self.fields.iter().map(|f| f.column_name))
            .collect()
    }

    fn validate_local(&self) -> Result<()> {
        let mut names: Vec<&str> = Vec::new();
        for ident in [self.name, self.table] {
            check_identifier(ident)?;
        }
        let all_names = self
            .fields
            .iter()
            .map(|f| f.name)
            .chain(self.list_fields.iter().map(|l| l.name))
            .chain(self.virtual_fields.iter().map(|v| v.name));
        for name in all_names {
            check_identifier(name)?;
            if SYSTEM_FIELDS.contains(&name) {
                return Err(Error::schema(
                    SchemaErrorKind::FieldConflict,
                    format!("{}.{} shadows a reserved field", self.name, name),
                ));
            }
            if names.contains(&name) {
                return Err(Error::schema(
                    SchemaErrorKind::FieldConflict,
                    format!("{}.{} is declared twice", self.name, name),
                ));
            }
            names.push(name);
        }
        for field in &self.fields {
            check_identifier(field.column_name)?;
        }
        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::schema(
            SchemaErrorKind::InvalidIdentifier,
            format!("'{}' is not a valid identifier", name),
        ))
    }
}

/// All registered entity schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: Vec<EntitySchema>,
    by_name: HashMap<&'static str, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity schema.
    ///
    /// Identifiers and field-name uniqueness are checked here; cross-entity
    /// references are checked by [`SchemaRegistry::validate`].
    #[tracing::instrument(level = "debug", skip(self, schema), fields(entity = schema.name))]
    pub fn register(&mut self, schema: EntitySchema) -> Result<()> {
        if self.by_name.contains_key(schema.name) {
            return Err(Error::schema(
                SchemaErrorKind::Duplicate,
                format!("entity '{}' is already registered", schema.name),
            ));
        }
        schema.validate_local()?;
        tracing::debug!(
            table = schema.table,
            fields = schema.fields.len(),
            "Registered entity schema"
        );
        self.by_name.insert(schema.name, self.schemas.len());
        self.schemas.push(schema);
        Ok(())
    }

    /// Check that every navigation and list field targets a registered
    /// entity, and that list-field reference fields exist on the target.
    pub fn validate(&self) -> Result<()> {
        for schema in &self.schemas {
            for nav in schema.navigations() {
                let target = nav.references.unwrap_or_default();
                if !self.by_name.contains_key(target) {
                    return Err(Error::schema(
                        SchemaErrorKind::UnknownTarget,
                        format!(
                            "{}.{} references unregistered entity '{}'",
                            schema.name, nav.name, target
                        ),
                    ));
                }
            }
            for list in &schema.list_fields {
                let target = self.get(list.target).ok_or_else(|| {
                    Error::schema(
                        SchemaErrorKind::UnknownTarget,
                        format!(
                            "{}.{} lists unregistered entity '{}'",
                            schema.name, list.name, list.target
                        ),
                    )
                })?;
                let back = target.get_field(list.reference_field);
                if !back.is_some_and(FieldInfo::is_navigation) {
                    return Err(Error::schema(
                        SchemaErrorKind::UnknownTarget,
                        format!(
                            "{}.{} has no reference field '{}' on '{}'",
                            schema.name, list.name, list.reference_field, list.target
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate and freeze the registry for sharing.
    pub fn finish(self) -> Result<Arc<SchemaRegistry>> {
        self.validate()?;
        Ok(Arc::new(self))
    }

    pub fn get(&self, name: &str) -> Option<&EntitySchema> {
        self.by_name.get(name).map(|&i| &self.schemas[i])
    }

    /// Look up a schema, failing with `QueryErrorKind::UnknownEntity`.
    pub fn require(&self, name: &str) -> Result<&EntitySchema> {
        self.get(name).ok_or_else(|| {
            Error::query(
                QueryErrorKind::UnknownEntity,
                format!("entity '{}' is not registered", name),
            )
        })
    }

    /// Registered schemas in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.iter()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
