//! Error types for relmap operations.

use std::fmt;

/// The primary error type for all relmap operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-level failures reported by the driver collaborator.
    Connection(ConnectionError),
    /// Query compilation or execution errors
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Transaction scope errors
    Transaction(TransactionError),
    /// Optimistic concurrency conflicts
    Concurrency(ConcurrencyError),
    /// Schema registration errors
    Schema(SchemaError),
    /// Configuration errors
    Config(ConfigError),
    /// The requested operation or construct has no mapping
    NotSupported(String),
    /// The operation is not valid in the current state
    InvalidOperation(String),
    /// A required argument was absent
    ArgumentNull(&'static str),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the connection
    Connect,
    /// Connection lost during operation
    Disconnected,
    /// Statement timed out
    Timeout,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Deadlock or serialization failure
    Deadlock,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    /// Property path that failed to resolve, when applicable.
    pub path: Option<String>,
    /// Entity type the query was compiled for.
    pub entity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Condition context does not match the query's entity type
    EntityMismatch,
    /// A property path segment does not resolve against the schema
    UnresolvedPath,
    /// A sort path needs a join that no condition produced
    UnresolvedSort,
    /// The predicate cannot be expressed as condition groups
    Malformed,
    /// The entity type is not registered
    UnknownEntity,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct TransactionError {
    pub kind: TransactionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionErrorKind {
    /// Savepoint not found
    SavepointNotFound,
}

#[derive(Debug)]
pub struct ConcurrencyError {
    pub entity: String,
    pub id: i64,
    pub expected_version: i64,
}

#[derive(Debug)]
pub struct SchemaError {
    pub kind: SchemaErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorKind {
    /// Entity type registered twice
    Duplicate,
    /// Identifier is not a plain SQL identifier
    InvalidIdentifier,
    /// Navigation or list-field target is not registered
    UnknownTarget,
    /// Field name collides with another field or a reserved field
    FieldConflict,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a query error without path context.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            message: message.into(),
            path: None,
            entity: None,
        })
    }

    /// Build a query error for a property path.
    pub fn query_path(
        kind: QueryErrorKind,
        entity: &str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Query(QueryError {
            kind,
            message: message.into(),
            path: Some(path.into()),
            entity: Some(entity.to_string()),
        })
    }

    pub fn transaction(kind: TransactionErrorKind, message: impl Into<String>) -> Self {
        Error::Transaction(TransactionError {
            kind,
            message: message.into(),
        })
    }

    pub fn schema(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Error::Schema(SchemaError {
            kind,
            message: message.into(),
        })
    }

    /// Is this a retryable error (deadlock, timeout)?
    ///
    /// The session never retries on its own; callers retry at the
    /// unit-of-work boundary with a fresh session.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Deadlock | ConnectionErrorKind::Timeout
            ),
            Error::Concurrency(_) => true,
            _ => false,
        }
    }

    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect | ConnectionErrorKind::Disconnected
            ),
            _ => false,
        }
    }

    /// Was this raised while compiling, before any I/O?
    pub fn is_compile_error(&self) -> bool {
        matches!(self, Error::Query(_) | Error::NotSupported(_))
    }

    pub fn query_kind(&self) -> Option<QueryErrorKind> {
        match self {
            Error::Query(q) => Some(q.kind),
            _ => None,
        }
    }

    pub fn transaction_kind(&self) -> Option<TransactionErrorKind> {
        match self {
            Error::Transaction(t) => Some(t.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Transaction(e) => write!(f, "Transaction error: {}", e.message),
            Error::Concurrency(e) => write!(f, "Concurrency error: {}", e),
            Error::Schema(e) => write!(f, "Schema error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
            Error::ArgumentNull(arg) => write!(f, "Argument '{}' must not be null", arg),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.entity, &self.path) {
            (Some(entity), Some(path)) => write!(f, "{} ({}.{})", self.message, entity, path),
            (None, Some(path)) => write!(f, "{} ({})", self.message, path),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ConcurrencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} was modified concurrently (expected version {})",
            self.entity, self.id, self.expected_version
        )
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        Error::Transaction(err)
    }
}

impl From<ConcurrencyError> for Error {
    fn from(err: ConcurrencyError) -> Self {
        Error::Concurrency(err)
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for relmap operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_and_connection_flags() {
        let deadlock = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Deadlock,
            message: "deadlock detected".to_string(),
            source: None,
        });
        assert!(deadlock.is_retryable());
        assert!(!deadlock.is_connection_error());

        let lost = Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Disconnected,
            message: "lost connection".to_string(),
            source: None,
        });
        assert!(lost.is_connection_error());
        assert!(!lost.is_retryable());
    }

    #[test]
    fn compile_errors_are_classified() {
        let err = Error::query(QueryErrorKind::UnresolvedSort, "no join for sort");
        assert!(err.is_compile_error());
        assert_eq!(err.query_kind(), Some(QueryErrorKind::UnresolvedSort));
        assert!(Error::NotSupported("Trim".into()).is_compile_error());
        assert!(!Error::InvalidOperation("x".into()).is_compile_error());
    }

    #[test]
    fn query_error_display_includes_path() {
        let err = Error::query_path(
            QueryErrorKind::UnresolvedPath,
            "Artist",
            "Label.Nope",
            "unknown field 'Nope'",
        );
        assert_eq!(
            err.to_string(),
            "Query error: unknown field 'Nope' (Artist.Label.Nope)"
        );
    }

    #[test]
    fn concurrency_error_display() {
        let err = Error::Concurrency(ConcurrencyError {
            entity: "Artist".into(),
            id: 7,
            expected_version: 3,
        });
        assert_eq!(
            err.to_string(),
            "Concurrency error: Artist #7 was modified concurrently (expected version 3)"
        );
        assert!(err.is_retryable());
    }
}
