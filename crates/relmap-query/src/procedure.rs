//! Stored procedure registry.
//!
//! Maps a caller-chosen signature to a procedure name and its ordered
//! parameter descriptors.

use relmap_core::{
    Command, Dialect, Error, Parameter, Result, SchemaErrorKind, SqlType, Value,
    is_valid_identifier,
};
use std::collections::HashMap;

/// One procedure parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureParameter {
    pub name: &'static str,
    pub db_type: SqlType,
    pub nullable: bool,
}

impl ProcedureParameter {
    pub const fn new(name: &'static str, db_type: SqlType) -> Self {
        Self {
            name,
            db_type,
            nullable: true,
        }
    }

    pub const fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureSpec {
    pub procedure: &'static str,
    pub parameters: Vec<ProcedureParameter>,
}

impl ProcedureSpec {
    pub fn new(procedure: &'static str) -> Self {
        Self {
            procedure,
            parameters: Vec::new(),
        }
    }

    pub fn parameter(mut self, parameter: ProcedureParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, ProcedureSpec>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, signature: impl Into<String>, spec: ProcedureSpec) -> Result<()> {
        let signature = signature.into();
        let names = std::iter::once(spec.procedure).chain(spec.parameters.iter().map(|p| p.name));
        for name in names {
            if !is_valid_identifier(name) {
                return Err(Error::schema(
                    SchemaErrorKind::InvalidIdentifier,
                    format!("'{}' is not a valid identifier", name),
                ));
            }
        }
        if self.procedures.contains_key(&signature) {
            return Err(Error::schema(
                SchemaErrorKind::Duplicate,
                format!("procedure signature '{}' is already registered", signature),
            ));
        }
        self.procedures.insert(signature, spec);
        Ok(())
    }

    pub fn get(&self, signature: &str) -> Option<&ProcedureSpec> {
        self.procedures.get(signature)
    }

    /// Build the call command for `signature` with positional arguments.
    pub fn command(
        &self,
        signature: &str,
        args: Vec<Value>,
        dialect: &dyn Dialect,
    ) -> Result<Command> {
        let spec = self.get(signature).ok_or_else(|| {
            Error::InvalidOperation(format!("no procedure registered for '{}'", signature))
        })?;
        if args.len() != spec.parameters.len() {
            return Err(Error::InvalidOperation(format!(
                "procedure '{}' takes {} arguments, got {}",
                spec.procedure,
                spec.parameters.len(),
                args.len()
            )));
        }
        let parameters: Vec<Parameter> = spec
            .parameters
            .iter()
            .zip(args)
            .map(|(p, value)| Parameter::new(p.name, value, p.db_type).nullable(p.nullable))
            .collect();
        let placeholders: Vec<String> = parameters.iter().map(Parameter::placeholder).collect();
        let text = dialect.procedure_call_sql(spec.procedure, &placeholders)?;
        tracing::debug!(sql = %text, "Built procedure call");
        Ok(Command::with_parameters(text, parameters))
    }
}
