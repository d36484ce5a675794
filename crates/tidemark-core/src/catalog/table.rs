//! Table definitions.

use super::{ColumnDef, ConstraintDef, SchemaError};
use crate::error::{aligned, Error};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::BTreeMap;

/// A table definition: columns, primary key and constraints.
///
/// Columns and constraints are keyed by name in sorted maps, so two
/// definitions built in different orders compare equal.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns keyed by name.
    pub columns: BTreeMap<String, ColumnDef>,
    /// Primary key columns, in key order.
    pub primary_key: Vec<String>,
    /// Constraints keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, ConstraintDef>,
}

impl TableDef {
    /// Create a new table with no columns.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            primary_key: Vec::new(),
            constraints: BTreeMap::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: ConstraintDef) -> Self {
        self.constraints
            .insert(constraint.name().to_string(), constraint);
        self
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.get(name)
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Get a constraint by name.
    pub fn constraint(&self, name: &str) -> Option<&ConstraintDef> {
        self.constraints.get(name)
    }

    /// Check whether a column is part of the primary key.
    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.iter().any(|c| c == name)
    }

    /// Check that every primary key column exists and is non-nullable.
    pub fn validate_key(&self) -> Result<(), SchemaError> {
        for key in &self.primary_key {
            let column = self.column(key).ok_or_else(|| SchemaError::UnknownColumn {
                table: self.name.clone(),
                column: key.clone(),
            })?;
            if column.nullable {
                return Err(SchemaError::NullableKey {
                    table: self.name.clone(),
                    column: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// The same table with its constraints removed.
    ///
    /// Constraints travel as separate operations so that tables can be
    /// created before the foreign keys between them.
    pub fn without_constraints(&self) -> Self {
        Self {
            constraints: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Render a `CREATE TABLE` statement (constraints excluded).
    pub fn to_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .values()
            .map(|c| format!("    {}", c.to_sql()))
            .collect();

        if !self.primary_key.is_empty() {
            let key = self
                .primary_key
                .iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("    PRIMARY KEY ({key})"));
        }

        format!("CREATE TABLE \"{}\" (\n{}\n);", self.name, lines.join(",\n"))
    }

    /// Serialize the table definition to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a table definition from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned(bytes))
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
