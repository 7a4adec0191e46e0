//! Declared column types.

use serde::{Deserialize, Serialize};

/// Declared SQL type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Double,

    // Fixed precision
    Decimal { precision: u8, scale: u8 },

    Boolean,

    // String types
    VarChar(u32),
    Text,

    Blob,

    // Date/time
    Date,
    Timestamp,

    Uuid,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Uuid => "UUID".to_string(),
        }
    }

    /// Check if this type is numeric.
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::SmallInt
                | SqlType::Integer
                | SqlType::BigInt
                | SqlType::Double
                | SqlType::Decimal { .. }
        )
    }

    /// Check if this type is text-based.
    pub const fn is_text(&self) -> bool {
        matches!(self, SqlType::VarChar(_) | SqlType::Text)
    }

    /// Declared maximum length, if the type carries one.
    pub const fn max_length(&self) -> Option<u32> {
        match self {
            SqlType::VarChar(len) => Some(*len),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_names() {
        assert_eq!(SqlType::VarChar(50).sql_name(), "VARCHAR(50)");
        assert_eq!(
            SqlType::Decimal {
                precision: 10,
                scale: 2
            }
            .sql_name(),
            "DECIMAL(10, 2)"
        );
    }

    #[test]
    fn classification() {
        assert!(SqlType::BigInt.is_numeric());
        assert!(SqlType::VarChar(10).is_text());
        assert!(!SqlType::Boolean.is_text());
        assert_eq!(SqlType::VarChar(10).max_length(), Some(10));
        assert_eq!(SqlType::Text.max_length(), None);
    }
}
