//! Core types and traits for relmap.
//!
//! - `EntitySchema` / `SchemaRegistry` for per-type mapping metadata
//! - `Entity` / `EntityRef` for dynamic, shareable domain objects
//! - `Connection` and `Dialect` contracts consumed by the session
//! - `Value`, `Row` and `Command` for data crossing the driver boundary

pub mod change_tracker;
pub mod command;
pub mod connection;
pub mod dialect;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod row;
pub mod schema;
pub mod types;
pub mod value;

pub use change_tracker::{ChangeTracker, FieldChange};
pub use command::{Command, Parameter, ParameterSet};
pub use connection::{Connection, IsolationLevel};
pub use dialect::{Dialect, DialectKind, Mysql, Postgres, SqlServer, Sqlite};
pub use entity::{Entity, EntityReadGuard, EntityRef, EntityWriteGuard, Reference};
pub use error::{
    ConcurrencyError, ConfigError, ConnectionError, ConnectionErrorKind, Error, QueryError,
    QueryErrorKind, Result, SchemaError, SchemaErrorKind, TransactionError, TransactionErrorKind,
    TypeError,
};
pub use identifiers::{is_valid_identifier, quote_ident};
pub use row::{ColumnInfo, Row};
pub use schema::{
    Cascade, DELETED_FIELD, EntitySchema, FieldInfo, FieldRef, ID_FIELD, ListFieldInfo,
    SchemaRegistry, VERSION_FIELD, VirtualFieldInfo,
};
pub use types::SqlType;
pub use value::Value;
