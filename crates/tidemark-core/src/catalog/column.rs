//! Column definitions for tables.

use super::types::ColumnType;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A column definition within a table.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column data type.
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    /// Whether the column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Default value used when a row omits the column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Current timestamp (evaluated at insert time).
    CurrentTimestamp,
}

impl DefaultValue {
    /// Render the default as a SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            DefaultValue::Null => "NULL".to_string(),
            DefaultValue::Bool(true) => "TRUE".to_string(),
            DefaultValue::Bool(false) => "FALSE".to_string(),
            DefaultValue::Int(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::String(s) => format!("'{}'", s.replace('\'', "''")),
            DefaultValue::CurrentTimestamp => "CURRENT_TIMESTAMP".to_string(),
        }
    }

    /// The value stored in existing rows when a column with this default is added.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DefaultValue::Null => serde_json::Value::Null,
            DefaultValue::Bool(b) => serde_json::Value::Bool(*b),
            DefaultValue::Int(i) => serde_json::Value::from(*i),
            DefaultValue::Float(f) => serde_json::Value::from(*f),
            DefaultValue::String(s) => serde_json::Value::String(s.clone()),
            DefaultValue::CurrentTimestamp => {
                serde_json::Value::String(chrono::Utc::now().to_rfc3339())
            }
        }
    }
}

impl ColumnDef {
    /// Create a new non-nullable column.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
        }
    }

    /// Create a nullable column.
    pub fn nullable(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, column_type)
        }
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Check if this column has a default value.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Whether rows may omit a value for this column.
    pub fn is_optional(&self) -> bool {
        self.nullable || self.default.is_some()
    }

    /// Render the column as it appears in a `CREATE TABLE` or `ADD COLUMN`.
    pub fn to_sql(&self) -> String {
        let mut sql = format!(
            "\"{}\" {}",
            self.name,
            self.column_type.to_string().to_uppercase()
        );
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql());
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_def_builder() {
        let column = ColumnDef::new("Email", ColumnType::Varchar(20))
            .with_default(DefaultValue::String("n/a".into()));

        assert_eq!(column.name, "Email");
        assert!(!column.nullable);
        assert!(column.has_default());
        assert!(column.is_optional());
    }

    #[test]
    fn test_nullable_column() {
        let column = ColumnDef::nullable("LastName", ColumnType::Varchar(10));

        assert!(column.nullable);
        assert!(!column.has_default());
        assert_eq!(column.to_sql(), "\"LastName\" VARCHAR(10)");
    }

    #[test]
    fn test_column_sql_with_default() {
        let column = ColumnDef::new("Note", ColumnType::Text)
            .with_default(DefaultValue::String("it's".into()));

        assert_eq!(column.to_sql(), "\"Note\" TEXT NOT NULL DEFAULT 'it''s'");
    }
}
