//! Database row representation.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    /// Create new column info from a list of column names.
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by name.
    ///
    /// Falls back to a case-insensitive match, since backends differ in how
    /// they fold unquoted identifiers.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied().or_else(|| {
            self.names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned by `Connection::execute_reader`.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with the given columns and values.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.index_of(name).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column name.
    pub fn get_named<T>(&self, name: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        T::try_from(value.clone()).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_by_name_case_insensitive() {
        let row = Row::new(
            vec!["Id".into(), "Alias".into()],
            vec![Value::BigInt(1), Value::Text("x".into())],
        );
        assert_eq!(row.get_by_name("alias"), Some(&Value::Text("x".into())));
        assert_eq!(row.get_by_name("Id"), Some(&Value::BigInt(1)));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn test_get_named_typed() {
        let row = Row::new(vec!["Version".into()], vec![Value::Int(4)]);
        let v: i64 = row.get_named("Version").unwrap();
        assert_eq!(v, 4);
        let err = row.get_named::<String>("Version").unwrap_err();
        assert!(err.to_string().contains("Version"));
    }

    #[test]
    fn test_shared_columns() {
        let cols = Arc::new(ColumnInfo::new(vec!["a".into()]));
        let r1 = Row::with_columns(Arc::clone(&cols), vec![Value::Int(1)]);
        let r2 = Row::with_columns(r1.column_info(), vec![Value::Int(2)]);
        assert!(Arc::ptr_eq(&r1.column_info(), &r2.column_info()));
        assert_eq!(r2.iter().next(), Some(("a", &Value::Int(2))));
    }
}
