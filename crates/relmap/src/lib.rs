//! relmap: a relational mapper for dynamic entities.
//!
//! relmap provides:
//!
//! - A condition-model query compiler producing parameterized SQL with join
//!   de-duplication, global filters and dialect-specific pagination
//! - A persistence session with an identity cache, cascade resolution,
//!   optimistic concurrency and soft deletes
//! - Nested transactions backed by savepoints
//! - A dialect contract covering limits, generated keys, savepoints and
//!   stored-procedure calls
//!
//! # Quick Start
//!
//! ```ignore
//! use relmap::prelude::*;
//!
//! let mut schemas = SchemaRegistry::new();
//! schemas.register(
//!     EntitySchema::new("Artist")
//!         .field(FieldInfo::new("Alias", "Alias", SqlType::VarChar(50)))
//!         .field(
//!             FieldInfo::reference("AnotherArtist", "AnotherArtist", "Artist")
//!                 .mandatory(true)
//!                 .cascade(Cascade::Save),
//!         ),
//! )?;
//! let registry = schemas.finish()?;
//!
//! let mut session = Session::open(conn, registry, SessionConfig::default())?;
//!
//! // Save (inserts the referenced artist first)
//! let artist = EntityRef::new(Entity::new("Artist"));
//! artist.write().set("Alias", "Nico");
//! session.save(&artist)?;
//!
//! // Query through a navigation
//! let mut query = Query::new("Artist")
//!     .filter(QueryCondition::ne("Artist", "AnotherArtist.Alias", Value::Null))?;
//! let found = session.query(&mut query)?;
//! ```

pub use relmap_core::{
    Cascade, ChangeTracker, ColumnInfo, Command, ConcurrencyError, ConfigError, Connection,
    ConnectionError, ConnectionErrorKind, Dialect, DialectKind, Entity, EntityReadGuard,
    EntityRef, EntitySchema, EntityWriteGuard, Error, FieldChange, FieldInfo, IsolationLevel,
    ListFieldInfo, Mysql, Parameter, Postgres, QueryError, QueryErrorKind, Reference, Result,
    Row, SchemaError, SchemaErrorKind, SchemaRegistry, SqlServer, SqlType, Sqlite,
    TransactionError, TransactionErrorKind, TypeError, Value, VirtualFieldInfo,
};

pub use relmap_query::{
    FilterCatalog, GlobalQueryFilter, Junction, Operator, Predicate, ProcedureParameter,
    ProcedureRegistry, ProcedureSpec, Query, QueryCondition, QueryConditionGroup, SortDirection,
    SortExpression,
};

pub use relmap_session::{
    Cache, CascadeResolver, DeletionBehavior, FlushMode, FlushResult, NestedTransaction, Session,
    SessionConfig, SessionEvent, SessionFactory, Transaction, TransactionState,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Cascade, Connection, Dialect, Entity, EntityRef, EntitySchema, Error, FieldInfo,
        FilterCatalog, FlushMode, IsolationLevel, Junction, ListFieldInfo, Operator, Predicate,
        Query, QueryCondition, QueryConditionGroup, Reference, Result, Row, SchemaRegistry,
        Session, SessionConfig, SortExpression, SqlType, Value,
    };
}
