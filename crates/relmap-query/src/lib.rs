//! Query compilation for relmap.
//!
//! `relmap-query` turns the condition model into SQL:
//!
//! - **Condition model**: `QueryCondition`, `QueryConditionGroup`, `Junction`
//!   and the `Predicate` combinator that lowers into groups.
//! - **Global filters**: `FilterCatalog`, applied ahead of caller conditions.
//! - **Compiler**: `Query` compiles to backend-neutral SQL with join
//!   de-duplication, sorting and a `LIMIT` marker, memoized between runs.
//! - **Writes**: INSERT, optimistic UPDATE and SELECT-by-id commands.
//! - **Procedures**: `ProcedureRegistry` maps signatures to calls.
//!
//! Commands execute through the `Connection` trait from `relmap-core`.

pub mod compiler;
pub mod condition;
pub mod filter;
pub mod join;
pub mod procedure;
pub mod sort;
pub mod write;

pub use compiler::Query;
pub use condition::{Junction, Operator, Predicate, QueryCondition, QueryConditionGroup};
pub use filter::{FilterCatalog, GlobalQueryFilter};
pub use join::{Join, JoinType};
pub use procedure::{ProcedureParameter, ProcedureRegistry, ProcedureSpec};
pub use sort::{SortDirection, SortExpression};
pub use write::{
    WriteImage, fk_fixup_command, insert_command, select_by_id_command, update_command,
};
