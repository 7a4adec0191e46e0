//! JOIN clauses produced while resolving navigation paths.

use relmap_core::ID_FIELD;

/// Types of joins the compiler emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Mandatory foreign key
    Inner,
    /// Nullable foreign key
    Left,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }

    pub const fn for_mandatory(mandatory: bool) -> Self {
        if mandatory {
            JoinType::Inner
        } else {
            JoinType::Left
        }
    }
}

/// `JOIN {table} {alias} ON {alias}.Id = {source_alias}.{fk_column}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: &'static str,
    pub alias: String,
    pub source_alias: String,
    /// Navigation field the join follows
    pub navigation: &'static str,
    pub fk_column: &'static str,
}

impl Join {
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} {} ON {}.{} = {}.{}",
            self.join_type.as_str(),
            self.table,
            self.alias,
            self.alias,
            ID_FIELD,
            self.source_alias,
            self.fk_column
        )
    }
}
