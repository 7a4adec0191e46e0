//! Backend dialect adapters.
//!
//! The query compiler emits backend-neutral SQL: named `@pN` placeholders and
//! a trailing ` LIMIT n` marker when a result limit is set. A [`Dialect`]
//! rewrites that marker, supplies the generated-key clause for inserts, and
//! produces savepoint and procedure-call text.

use crate::error::{Error, Result};
use crate::identifiers::{quote_ident, quote_ident_bracket, quote_ident_mysql};
use crate::schema::ID_FIELD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-backend SQL adapter.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    /// Quote an identifier for this backend.
    fn quote_identifier(&self, name: &str) -> String;

    /// Rewrite the neutral ` LIMIT n` marker at the end of `sql`.
    ///
    /// `table_alias` is the root alias, for backends that need an explicit
    /// ordering before paging.
    fn apply_limit(&self, sql: &str, table_alias: &str, limit: u64, offset: Option<u64>) -> String;

    /// Clause appended to INSERT text so that the driver returns the
    /// generated id.
    fn generated_key_clause(&self) -> String;

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {}", name)
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", name)
    }

    /// `None` when the backend has no explicit savepoint release.
    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {}", name))
    }

    /// Text invoking a stored procedure with the given placeholders.
    fn procedure_call_sql(&self, procedure: &str, placeholders: &[String]) -> Result<String>;
}

/// Backend selector, usable in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DialectKind {
    #[default]
    Postgres,
    Sqlite,
    Mysql,
    SqlServer,
}

impl DialectKind {
    /// The shared adapter for this backend.
    pub fn adapter(self) -> &'static dyn Dialect {
        match self {
            DialectKind::Postgres => &Postgres,
            DialectKind::Sqlite => &Sqlite,
            DialectKind::Mysql => &Mysql,
            DialectKind::SqlServer => &SqlServer,
        }
    }
}

/// Remove the trailing neutral marker, if present.
fn strip_limit_marker(sql: &str, limit: u64) -> &str {
    let marker = format!(" LIMIT {}", limit);
    sql.strip_suffix(marker.as_str()).unwrap_or(sql)
}

fn limit_offset(sql: &str, limit: u64, offset: Option<u64>) -> String {
    let base = strip_limit_marker(sql, limit);
    match offset {
        Some(off) if off > 0 => format!("{} LIMIT {} OFFSET {}", base, limit, off),
        _ => format!("{} LIMIT {}", base, limit),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn apply_limit(&self, sql: &str, _table_alias: &str, limit: u64, offset: Option<u64>) -> String {
        limit_offset(sql, limit, offset)
    }

    fn generated_key_clause(&self) -> String {
        format!(" RETURNING {}", ID_FIELD)
    }

    fn procedure_call_sql(&self, procedure: &str, placeholders: &[String]) -> Result<String> {
        Ok(format!(
            "SELECT * FROM {}({})",
            procedure,
            placeholders.join(", ")
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident(name)
    }

    fn apply_limit(&self, sql: &str, _table_alias: &str, limit: u64, offset: Option<u64>) -> String {
        limit_offset(sql, limit, offset)
    }

    fn generated_key_clause(&self) -> String {
        "; SELECT last_insert_rowid()".to_string()
    }

    fn procedure_call_sql(&self, procedure: &str, _placeholders: &[String]) -> Result<String> {
        Err(Error::NotSupported(format!(
            "SQLite has no stored procedures (calling '{}')",
            procedure
        )))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mysql;

impl Dialect for Mysql {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident_mysql(name)
    }

    fn apply_limit(&self, sql: &str, _table_alias: &str, limit: u64, offset: Option<u64>) -> String {
        let base = strip_limit_marker(sql, limit);
        match offset {
            Some(off) if off > 0 => format!("{} LIMIT {}, {}", base, off, limit),
            _ => format!("{} LIMIT {}", base, limit),
        }
    }

    fn generated_key_clause(&self) -> String {
        "; SELECT LAST_INSERT_ID()".to_string()
    }

    fn procedure_call_sql(&self, procedure: &str, placeholders: &[String]) -> Result<String> {
        Ok(format!("CALL {}({})", procedure, placeholders.join(", ")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn quote_identifier(&self, name: &str) -> String {
        quote_ident_bracket(name)
    }

    fn apply_limit(&self, sql: &str, table_alias: &str, limit: u64, offset: Option<u64>) -> String {
        let base = strip_limit_marker(sql, limit);
        match offset {
            Some(off) if off > 0 => {
                // OFFSET/FETCH requires an ORDER BY.
                let ordered = if base.contains(" ORDER BY ") {
                    base.to_string()
                } else {
                    format!("{} ORDER BY {}.{}", base, table_alias, ID_FIELD)
                };
                format!(
                    "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                    ordered, off, limit
                )
            }
            _ => match base.strip_prefix("SELECT ") {
                Some(rest) => format!("SELECT TOP {} {}", limit, rest),
                None => base.to_string(),
            },
        }
    }

    fn generated_key_clause(&self) -> String {
        "; SELECT SCOPE_IDENTITY()".to_string()
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {}", name)
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {}", name)
    }

    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn procedure_call_sql(&self, procedure: &str, placeholders: &[String]) -> Result<String> {
        if placeholders.is_empty() {
            Ok(format!("EXEC {}", procedure))
        } else {
            Ok(format!("EXEC {} {}", procedure, placeholders.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQL: &str = "SELECT artist.Id FROM Artist artist LIMIT 5";

    #[test]
    fn postgres_limit_and_offset() {
        assert_eq!(Postgres.apply_limit(SQL, "artist", 5, None), SQL);
        assert_eq!(
            Postgres.apply_limit(SQL, "artist", 5, Some(10)),
            "SELECT artist.Id FROM Artist artist LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn mysql_offset_comes_first() {
        assert_eq!(
            Mysql.apply_limit(SQL, "artist", 5, Some(10)),
            "SELECT artist.Id FROM Artist artist LIMIT 10, 5"
        );
    }

    #[test]
    fn sqlserver_top_and_fetch() {
        assert_eq!(
            SqlServer.apply_limit(SQL, "artist", 5, None),
            "SELECT TOP 5 artist.Id FROM Artist artist"
        );
        assert_eq!(
            SqlServer.apply_limit(SQL, "artist", 5, Some(2)),
            "SELECT artist.Id FROM Artist artist ORDER BY artist.Id OFFSET 2 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn generated_key_clauses() {
        assert_eq!(Postgres.generated_key_clause(), " RETURNING Id");
        assert_eq!(
            DialectKind::SqlServer.adapter().generated_key_clause(),
            "; SELECT SCOPE_IDENTITY()"
        );
    }

    #[test]
    fn savepoint_text() {
        assert_eq!(Postgres.savepoint_sql("sp_1"), "SAVEPOINT sp_1");
        assert_eq!(SqlServer.savepoint_sql("sp_1"), "SAVE TRANSACTION sp_1");
        assert_eq!(SqlServer.release_savepoint_sql("sp_1"), None);
        assert_eq!(
            Sqlite.release_savepoint_sql("sp_1").as_deref(),
            Some("RELEASE SAVEPOINT sp_1")
        );
    }

    #[test]
    fn procedure_calls() {
        let ps = vec!["@p1".to_string(), "@p2".to_string()];
        assert_eq!(
            Mysql.procedure_call_sql("top_artists", &ps).unwrap(),
            "CALL top_artists(@p1, @p2)"
        );
        assert_eq!(
            SqlServer.procedure_call_sql("top_artists", &ps).unwrap(),
            "EXEC top_artists @p1, @p2"
        );
        assert!(matches!(
            Sqlite.procedure_call_sql("x", &[]),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn quoting_per_backend() {
        assert_eq!(Postgres.quote_identifier("a"), "\"a\"");
        assert_eq!(Mysql.quote_identifier("a"), "`a`");
        assert_eq!(SqlServer.quote_identifier("a"), "[a]");
    }
}
