//! SQL commands: text plus ordered, named parameters.

use crate::types::SqlType;
use crate::value::Value;
use std::fmt;

/// A bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter name without prefix (`p1`, `p2`, ...)
    pub name: String,
    pub value: Value,
    /// Declared DB type of the column the parameter is compared with
    pub db_type: SqlType,
    pub nullable: bool,
    /// Declared or observed size for variable-width types
    pub size: Option<u32>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Value, db_type: SqlType) -> Self {
        let size = db_type.max_length().or_else(|| value.size());
        Self {
            name: name.into(),
            value,
            db_type,
            nullable: true,
            size,
        }
    }

    /// Parameter with a type inferred from its value.
    pub fn inferred(name: impl Into<String>, value: Value) -> Self {
        let db_type = value.inferred_sql_type();
        Self::new(name, value, db_type)
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Placeholder text as it appears in SQL (`@p1`).
    pub fn placeholder(&self) -> String {
        format!("@{}", self.name)
    }
}

/// SQL text with its parameters, ready for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<Parameter>,
}

impl Command {
    /// A command without parameters.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(text: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    /// Parameter values in order.
    pub fn values(&self) -> Vec<Value> {
        self.parameters.iter().map(|p| p.value.clone()).collect()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Hands out sequential parameter names for one command.
#[derive(Debug, Default)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, value: Value, db_type: SqlType, nullable: bool) -> String {
        let name = format!("p{}", self.params.len() + 1);
        let param = Parameter::new(name, value, db_type).nullable(nullable);
        let placeholder = param.placeholder();
        self.params.push(param);
        placeholder
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_vec(self) -> Vec<Parameter> {
        self.params
    }
}
