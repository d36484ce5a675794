//! Schema snapshot - the canonical state of a whole schema.

use super::{ConstraintDef, SchemaError, TableDef};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::collections::BTreeMap;

/// Mapping from table name to table definition.
///
/// A snapshot describes either the declared schema (derived from entity
/// declarations) or the applied schema (replayed from migration history).
/// Equality is structural and independent of declaration order.
#[derive(Debug, Clone, Default, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct SchemaSnapshot {
    /// Tables keyed by name.
    pub tables: BTreeMap<String, TableDef>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Get a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Get a table by name, failing if it does not exist.
    pub fn require_table(&self, name: &str) -> Result<&TableDef, SchemaError> {
        self.tables.get(name).ok_or_else(|| SchemaError::UnknownTable {
            table: name.to_string(),
        })
    }

    /// Mutable access to a table, failing if it does not exist.
    pub fn require_table_mut(&mut self, name: &str) -> Result<&mut TableDef, SchemaError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| SchemaError::UnknownTable {
                table: name.to_string(),
            })
    }

    /// Check if a table exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Check if the snapshot has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// List all table names in sorted order.
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(|s| s.as_str()).collect()
    }

    /// Iterate over every constraint of every table.
    pub fn constraints(&self) -> impl Iterator<Item = &ConstraintDef> {
        self.tables.values().flat_map(|t| t.constraints.values())
    }

    /// Foreign keys of other tables that reference `table`.
    pub fn references_to<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a ConstraintDef> {
        self.constraints()
            .filter(move |c| c.referenced_table() == Some(table) && c.table() != table)
    }

    /// Check referential consistency: primary keys and constraints must name
    /// existing columns, foreign keys must target existing tables and columns.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for table in self.tables.values() {
            if table.primary_key.is_empty() {
                return Err(SchemaError::MissingPrimaryKey {
                    table: table.name.clone(),
                });
            }
            table.validate_key()?;
            for constraint in table.constraints.values() {
                self.validate_constraint(table, constraint)?;
            }
        }
        Ok(())
    }

    pub(crate) fn validate_constraint(
        &self,
        table: &TableDef,
        constraint: &ConstraintDef,
    ) -> Result<(), SchemaError> {
        for column in constraint.columns() {
            if !table.has_column(column) {
                return Err(SchemaError::UnknownColumn {
                    table: table.name.clone(),
                    column: column.clone(),
                });
            }
        }

        if let ConstraintDef::ForeignKey {
            name,
            columns,
            references_table,
            references_columns,
            ..
        } = constraint
        {
            let target = self
                .table(references_table)
                .ok_or_else(|| SchemaError::InvalidReference {
                    constraint: name.clone(),
                    reason: format!("table '{references_table}' does not exist"),
                })?;

            if columns.len() != references_columns.len() {
                return Err(SchemaError::InvalidReference {
                    constraint: name.clone(),
                    reason: format!(
                        "{} column(s) reference {} column(s)",
                        columns.len(),
                        references_columns.len()
                    ),
                });
            }
            if let Some(missing) = references_columns.iter().find(|c| !target.has_column(c)) {
                return Err(SchemaError::InvalidReference {
                    constraint: name.clone(),
                    reason: format!("column '{references_table}.{missing}' does not exist"),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType};

    fn sample_snapshot() -> SchemaSnapshot {
        let users = TableDef::new("Users")
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_primary_key(["Id"]);
        let addresses = TableDef::new("Addresses")
            .with_column(ColumnDef::new("IdUser", ColumnType::Int))
            .with_primary_key(["IdUser"])
            .with_constraint(ConstraintDef::foreign_key(
                "fk_Addresses_Users_IdUser",
                "Addresses",
                "IdUser",
                "Users",
                "Id",
            ));

        SchemaSnapshot::new().with_table(users).with_table(addresses)
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = sample_snapshot();

        assert!(snapshot.contains("Users"));
        assert!(snapshot.table("Orders").is_none());
        assert_eq!(snapshot.table_names(), vec!["Addresses", "Users"]);
        assert!(matches!(
            snapshot.require_table("Orders"),
            Err(SchemaError::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_references_to() {
        let snapshot = sample_snapshot();

        assert_eq!(snapshot.references_to("Users").count(), 1);
        assert_eq!(snapshot.references_to("Addresses").count(), 0);
    }

    #[test]
    fn test_validate_accepts_consistent_snapshot() {
        assert!(sample_snapshot().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_foreign_key() {
        let mut snapshot = sample_snapshot();
        snapshot.tables.remove("Users");

        let err = snapshot.validate().unwrap_err();
        assert!(matches!(err, SchemaError::InvalidReference { .. }));
    }

    #[test]
    fn test_validate_rejects_missing_primary_key() {
        let snapshot = SchemaSnapshot::new()
            .with_table(TableDef::new("Logs").with_column(ColumnDef::new("Line", ColumnType::Text)));

        assert_eq!(
            snapshot.validate().unwrap_err(),
            SchemaError::MissingPrimaryKey {
                table: "Logs".into()
            }
        );
    }
}
