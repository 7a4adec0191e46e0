//! The connection collaborator.
//!
//! Drivers implement [`Connection`]; the session consumes it. All calls are
//! blocking.

use crate::command::Command;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Dirty reads, non-repeatable reads and phantoms possible.
    ReadUncommitted,

    /// Only committed changes from others are visible.
    #[default]
    ReadCommitted,

    /// A consistent snapshot for the whole transaction.
    RepeatableRead,

    /// Transactions appear to execute sequentially.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL syntax for this isolation level.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// A blocking database connection.
///
/// Errors are propagated to callers unmodified; the session never retries.
pub trait Connection: Send {
    fn open(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    /// Begin a physical transaction.
    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Execute a statement, returning the number of affected rows.
    fn execute_non_query(&mut self, cmd: &Command) -> Result<u64>;

    /// Execute a query returning a single value.
    fn execute_scalar(&mut self, cmd: &Command) -> Result<Value>;

    /// Execute a query returning rows.
    fn execute_reader(&mut self, cmd: &Command) -> Result<Vec<Row>>;

    /// Execute an INSERT carrying the dialect's generated-key clause,
    /// returning the generated id.
    fn execute_insert(&mut self, cmd: &Command) -> Result<i64>;

    fn dialect(&self) -> &dyn Dialect;

    fn savepoint(&mut self, name: &str) -> Result<()> {
        let cmd = Command::new(self.dialect().savepoint_sql(name));
        self.execute_non_query(&cmd).map(|_| ())
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let cmd = Command::new(self.dialect().rollback_to_savepoint_sql(name));
        self.execute_non_query(&cmd).map(|_| ())
    }

    fn release_savepoint(&mut self, name: &str) -> Result<()> {
        match self.dialect().release_savepoint_sql(name) {
            Some(text) => self.execute_non_query(&Command::new(text)).map(|_| ()),
            None => Ok(()),
        }
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<()> {
        (**self).begin_transaction(isolation)
    }

    fn commit(&mut self) -> Result<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> Result<()> {
        (**self).rollback()
    }

    fn execute_non_query(&mut self, cmd: &Command) -> Result<u64> {
        (**self).execute_non_query(cmd)
    }

    fn execute_scalar(&mut self, cmd: &Command) -> Result<Value> {
        (**self).execute_scalar(cmd)
    }

    fn execute_reader(&mut self, cmd: &Command) -> Result<Vec<Row>> {
        (**self).execute_reader(cmd)
    }

    fn execute_insert(&mut self, cmd: &Command) -> Result<i64> {
        (**self).execute_insert(cmd)
    }

    fn dialect(&self) -> &dyn Dialect {
        (**self).dialect()
    }

    fn savepoint(&mut self, name: &str) -> Result<()> {
        (**self).savepoint(name)
    }

    fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        (**self).rollback_to_savepoint(name)
    }

    fn release_savepoint(&mut self, name: &str) -> Result<()> {
        (**self).release_savepoint(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Postgres, SqlServer};

    #[derive(Debug, Default)]
    struct Recorder {
        sql: Vec<String>,
        sqlserver: bool,
    }

    impl Connection for Recorder {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
        fn begin_transaction(&mut self, _isolation: IsolationLevel) -> Result<()> {
            Ok(())
        }
        fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn execute_non_query(&mut self, cmd: &Command) -> Result<u64> {
            self.sql.push(cmd.text.clone());
            Ok(0)
        }
        fn execute_scalar(&mut self, _cmd: &Command) -> Result<Value> {
            Ok(Value::Null)
        }
        fn execute_reader(&mut self, _cmd: &Command) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        fn execute_insert(&mut self, _cmd: &Command) -> Result<i64> {
            Ok(1)
        }
        fn dialect(&self) -> &dyn Dialect {
            if self.sqlserver { &SqlServer } else { &Postgres }
        }
    }

    #[test]
    fn isolation_sql() {
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn default_savepoint_methods_use_dialect_text() {
        let mut conn = Recorder::default();
        conn.savepoint("sp_1").unwrap();
        conn.rollback_to_savepoint("sp_1").unwrap();
        conn.release_savepoint("sp_1").unwrap();
        assert_eq!(
            conn.sql,
            vec![
                "SAVEPOINT sp_1",
                "ROLLBACK TO SAVEPOINT sp_1",
                "RELEASE SAVEPOINT sp_1"
            ]
        );
    }

    #[test]
    fn release_is_skipped_without_backend_support() {
        let mut conn: Box<dyn Connection> = Box::new(Recorder {
            sqlserver: true,
            ..Recorder::default()
        });
        conn.release_savepoint("sp_1").unwrap();
        conn.savepoint("sp_2").unwrap();
        assert_eq!(conn.dialect().savepoint_sql("x"), "SAVE TRANSACTION x");
    }
}
