//! Schema operations - the atomic steps a migration is made of.

use crate::catalog::{
    validate_identifier, ColumnDef, ConstraintDef, Conversion, SchemaError, SchemaSnapshot,
    TableDef,
};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A single atomic schema change.
///
/// Each variant carries enough to both apply and reverse the change, so a
/// dropped table or column keeps its full definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a table. Constraints are added by separate operations.
    CreateTable {
        /// Table definition.
        table: TableDef,
    },
    /// Drop a table.
    DropTable {
        /// Definition of the dropped table.
        table: TableDef,
    },
    /// Add a column to an existing table.
    AddColumn {
        /// Owning table.
        table: String,
        /// Column definition.
        column: ColumnDef,
    },
    /// Drop a column.
    DropColumn {
        /// Owning table.
        table: String,
        /// Definition of the dropped column.
        column: ColumnDef,
    },
    /// Change a column's type, nullability or default.
    AlterColumn {
        /// Owning table.
        table: String,
        /// Definition before the change.
        from: ColumnDef,
        /// Definition after the change.
        to: ColumnDef,
    },
    /// Replace a table's primary key.
    AlterPrimaryKey {
        /// Owning table.
        table: String,
        /// Key columns before the change.
        from: Vec<String>,
        /// Key columns after the change.
        to: Vec<String>,
    },
    /// Rename a table.
    RenameTable {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Rename a column.
    RenameColumn {
        /// Owning table.
        table: String,
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Add a constraint.
    AddConstraint {
        /// Constraint definition (names its table).
        constraint: ConstraintDef,
    },
    /// Drop a constraint.
    DropConstraint {
        /// Definition of the dropped constraint.
        constraint: ConstraintDef,
    },
    /// No-op placeholder for a down step that cannot restore the prior state.
    Irreversible {
        /// What cannot be restored.
        reason: String,
    },
}

/// Kind tag of an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OperationKind {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AlterColumn,
    AlterPrimaryKey,
    RenameTable,
    RenameColumn,
    AddConstraint,
    DropConstraint,
    Irreversible,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::CreateTable => "create_table",
            OperationKind::DropTable => "drop_table",
            OperationKind::AddColumn => "add_column",
            OperationKind::DropColumn => "drop_column",
            OperationKind::AlterColumn => "alter_column",
            OperationKind::AlterPrimaryKey => "alter_primary_key",
            OperationKind::RenameTable => "rename_table",
            OperationKind::RenameColumn => "rename_column",
            OperationKind::AddConstraint => "add_constraint",
            OperationKind::DropConstraint => "drop_constraint",
            OperationKind::Irreversible => "irreversible",
        };
        write!(f, "{name}")
    }
}

/// The inverse of an operation and what it fails to restore.
#[derive(Debug, Clone, PartialEq)]
pub enum Inversion {
    /// Restores the prior schema and data.
    Exact(Operation),
    /// Restores the prior schema, but removed data is gone.
    DataLoss {
        /// The inverse operation.
        operation: Operation,
        /// What is not restored.
        warning: String,
    },
    /// Only approximates the prior schema; accepted explicitly or refused.
    Lossy {
        /// The best-effort inverse.
        operation: Operation,
        /// What differs from the prior state.
        reason: String,
    },
    /// No inverse exists.
    Impossible {
        /// Why not.
        reason: String,
    },
}

impl Operation {
    /// Get the kind tag.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateTable { .. } => OperationKind::CreateTable,
            Operation::DropTable { .. } => OperationKind::DropTable,
            Operation::AddColumn { .. } => OperationKind::AddColumn,
            Operation::DropColumn { .. } => OperationKind::DropColumn,
            Operation::AlterColumn { .. } => OperationKind::AlterColumn,
            Operation::AlterPrimaryKey { .. } => OperationKind::AlterPrimaryKey,
            Operation::RenameTable { .. } => OperationKind::RenameTable,
            Operation::RenameColumn { .. } => OperationKind::RenameColumn,
            Operation::AddConstraint { .. } => OperationKind::AddConstraint,
            Operation::DropConstraint { .. } => OperationKind::DropConstraint,
            Operation::Irreversible { .. } => OperationKind::Irreversible,
        }
    }

    /// The table this operation touches, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::CreateTable { table } | Operation::DropTable { table } => Some(&table.name),
            Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::AlterColumn { table, .. }
            | Operation::AlterPrimaryKey { table, .. }
            | Operation::RenameColumn { table, .. } => Some(table),
            Operation::RenameTable { from, .. } => Some(from),
            Operation::AddConstraint { constraint } | Operation::DropConstraint { constraint } => {
                Some(constraint.table())
            }
            Operation::Irreversible { .. } => None,
        }
    }

    /// One-line human readable description.
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateTable { table } => format!("create table {}", table.name),
            Operation::DropTable { table } => format!("drop table {}", table.name),
            Operation::AddColumn { table, column } => {
                format!("add column {table}.{} {}", column.name, column.column_type)
            }
            Operation::DropColumn { table, column } => {
                format!("drop column {table}.{}", column.name)
            }
            Operation::AlterColumn { table, from, to } => {
                let mut changes = Vec::new();
                if from.column_type != to.column_type {
                    changes.push(format!("{} -> {}", from.column_type, to.column_type));
                }
                if from.nullable != to.nullable {
                    let nullability = if to.nullable { "null" } else { "not null" };
                    changes.push(nullability.to_string());
                }
                if from.default != to.default {
                    changes.push(match &to.default {
                        Some(default) => format!("default {}", default.to_sql()),
                        None => "drop default".to_string(),
                    });
                }
                format!("alter column {table}.{} {}", to.name, changes.join(", "))
            }
            Operation::AlterPrimaryKey { table, to, .. } => {
                format!("alter primary key {table} ({})", to.join(", "))
            }
            Operation::RenameTable { from, to } => format!("rename table {from} to {to}"),
            Operation::RenameColumn { table, from, to } => {
                format!("rename column {table}.{from} to {to}")
            }
            Operation::AddConstraint { constraint } => {
                format!("add constraint {} on {}", constraint.name(), constraint.table())
            }
            Operation::DropConstraint { constraint } => {
                format!("drop constraint {} on {}", constraint.name(), constraint.table())
            }
            Operation::Irreversible { reason } => format!("irreversible: {reason}"),
        }
    }

    /// Apply this operation to a snapshot.
    ///
    /// Fails without modifying the snapshot when the operation does not fit
    /// the current state (unknown table, duplicate column, dangling reference).
    pub fn apply_to(&self, schema: &mut SchemaSnapshot) -> Result<(), SchemaError> {
        match self {
            Operation::CreateTable { table } => {
                validate_identifier(&table.name)?;
                if schema.contains(&table.name) {
                    return Err(SchemaError::TableExists {
                        table: table.name.clone(),
                    });
                }
                for column in table.columns.keys() {
                    validate_identifier(column)?;
                }
                table.validate_key()?;
                let mut next = schema.clone();
                next.tables.insert(table.name.clone(), table.clone());
                for constraint in table.constraints.values() {
                    next.validate_constraint(table, constraint)?;
                }
                *schema = next;
            }

            Operation::DropTable { table } => {
                schema.require_table(&table.name)?;
                if let Some(fk) = schema.references_to(&table.name).next() {
                    return Err(SchemaError::TableReferenced {
                        table: table.name.clone(),
                        by: fk.name().to_string(),
                    });
                }
                schema.tables.remove(&table.name);
            }

            Operation::AddColumn { table, column } => {
                validate_identifier(&column.name)?;
                let def = schema.require_table_mut(table)?;
                if def.has_column(&column.name) {
                    return Err(SchemaError::ColumnExists {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                def.columns.insert(column.name.clone(), column.clone());
            }

            Operation::DropColumn { table, column } => {
                ensure_column_unused(schema, table, &column.name)?;
                let def = schema.require_table_mut(table)?;
                def.columns.remove(&column.name);
            }

            Operation::AlterColumn { table, from, to } => {
                let def = schema.require_table_mut(table)?;
                if !def.has_column(&from.name) {
                    return Err(SchemaError::UnknownColumn {
                        table: table.clone(),
                        column: from.name.clone(),
                    });
                }
                if from.name != to.name {
                    return Err(SchemaError::InvalidName(to.name.clone()));
                }
                if to.nullable && def.is_key_column(&to.name) {
                    return Err(SchemaError::NullableKey {
                        table: table.clone(),
                        column: to.name.clone(),
                    });
                }
                def.columns.insert(to.name.clone(), to.clone());
            }

            Operation::AlterPrimaryKey { table, to, .. } => {
                let def = schema.require_table_mut(table)?;
                let mut altered = def.clone();
                altered.primary_key = to.clone();
                altered.validate_key()?;
                if to.is_empty() {
                    return Err(SchemaError::MissingPrimaryKey {
                        table: table.clone(),
                    });
                }
                *def = altered;
            }

            Operation::RenameTable { from, to } => {
                validate_identifier(to)?;
                if schema.contains(to) {
                    return Err(SchemaError::TableExists { table: to.clone() });
                }
                let mut def = schema
                    .tables
                    .remove(from)
                    .ok_or_else(|| SchemaError::UnknownTable {
                        table: from.clone(),
                    })?;
                def.name = to.clone();
                schema.tables.insert(to.clone(), def);
                for table in schema.tables.values_mut() {
                    for constraint in table.constraints.values_mut() {
                        constraint.rename_table(from, to);
                    }
                }
            }

            Operation::RenameColumn { table, from, to } => {
                validate_identifier(to)?;
                let def = schema.require_table_mut(table)?;
                if def.has_column(to) {
                    return Err(SchemaError::ColumnExists {
                        table: table.clone(),
                        column: to.clone(),
                    });
                }
                let mut column =
                    def.columns
                        .remove(from)
                        .ok_or_else(|| SchemaError::UnknownColumn {
                            table: table.clone(),
                            column: from.clone(),
                        })?;
                column.name = to.clone();
                def.columns.insert(to.clone(), column);
                for key in def.primary_key.iter_mut().filter(|k| k.as_str() == from.as_str()) {
                    *key = to.clone();
                }
                for def in schema.tables.values_mut() {
                    for constraint in def.constraints.values_mut() {
                        constraint.rename_column(table, from, to);
                    }
                }
            }

            Operation::AddConstraint { constraint } => {
                validate_identifier(constraint.name())?;
                let def = schema.require_table(constraint.table())?;
                if def.constraint(constraint.name()).is_some() {
                    return Err(SchemaError::ConstraintExists {
                        table: def.name.clone(),
                        constraint: constraint.name().to_string(),
                    });
                }
                schema.validate_constraint(def, constraint)?;
                let def = schema.require_table_mut(constraint.table())?;
                def.constraints
                    .insert(constraint.name().to_string(), constraint.clone());
            }

            Operation::DropConstraint { constraint } => {
                let def = schema.require_table_mut(constraint.table())?;
                if def.constraints.remove(constraint.name()).is_none() {
                    return Err(SchemaError::UnknownConstraint {
                        table: constraint.table().to_string(),
                        constraint: constraint.name().to_string(),
                    });
                }
            }

            Operation::Irreversible { .. } => {}
        }

        Ok(())
    }

    /// Compute the operation that undoes this one.
    pub fn invert(&self) -> Inversion {
        match self {
            Operation::CreateTable { table } => Inversion::Exact(Operation::DropTable {
                table: table.clone(),
            }),

            Operation::DropTable { table } => Inversion::DataLoss {
                operation: Operation::CreateTable {
                    table: table.clone(),
                },
                warning: format!("rows of table {} are not restored", table.name),
            },

            Operation::AddColumn { table, column } => Inversion::Exact(Operation::DropColumn {
                table: table.clone(),
                column: column.clone(),
            }),

            Operation::DropColumn { table, column } if column.is_optional() => {
                Inversion::DataLoss {
                    operation: Operation::AddColumn {
                        table: table.clone(),
                        column: column.clone(),
                    },
                    warning: format!("values of column {table}.{} are not restored", column.name),
                }
            }

            Operation::DropColumn { table, column } => Inversion::Lossy {
                operation: Operation::AddColumn {
                    table: table.clone(),
                    column: ColumnDef {
                        nullable: true,
                        ..column.clone()
                    },
                },
                reason: format!(
                    "column {table}.{} is re-added as nullable; its values are not restored",
                    column.name
                ),
            },

            Operation::AlterColumn { table, from, to } => {
                let inverse = Operation::AlterColumn {
                    table: table.clone(),
                    from: to.clone(),
                    to: from.clone(),
                };
                match from.column_type.conversion_to(&to.column_type) {
                    Conversion::Narrowing => Inversion::Lossy {
                        operation: inverse,
                        reason: format!(
                            "narrowing {table}.{} from {} to {} loses precision that reverting cannot restore",
                            from.name, from.column_type, to.column_type
                        ),
                    },
                    Conversion::Identical | Conversion::Widening => Inversion::Exact(inverse),
                }
            }

            Operation::AlterPrimaryKey { table, from, to } => {
                Inversion::Exact(Operation::AlterPrimaryKey {
                    table: table.clone(),
                    from: to.clone(),
                    to: from.clone(),
                })
            }

            Operation::RenameTable { from, to } => Inversion::Exact(Operation::RenameTable {
                from: to.clone(),
                to: from.clone(),
            }),

            Operation::RenameColumn { table, from, to } => {
                Inversion::Exact(Operation::RenameColumn {
                    table: table.clone(),
                    from: to.clone(),
                    to: from.clone(),
                })
            }

            Operation::AddConstraint { constraint } => {
                Inversion::Exact(Operation::DropConstraint {
                    constraint: constraint.clone(),
                })
            }

            Operation::DropConstraint { constraint } => {
                Inversion::Exact(Operation::AddConstraint {
                    constraint: constraint.clone(),
                })
            }

            Operation::Irreversible { reason } => Inversion::Impossible {
                reason: reason.clone(),
            },
        }
    }
}

fn ensure_column_unused(
    schema: &SchemaSnapshot,
    table: &str,
    column: &str,
) -> Result<(), SchemaError> {
    let def = schema.require_table(table)?;
    if !def.has_column(column) {
        return Err(SchemaError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        });
    }

    let in_use = |by: String| SchemaError::ColumnInUse {
        table: table.to_string(),
        column: column.to_string(),
        by,
    };

    if def.is_key_column(column) {
        return Err(in_use("the primary key".to_string()));
    }
    if let Some(c) = def
        .constraints
        .values()
        .find(|c| c.columns().iter().any(|col| col == column))
    {
        return Err(in_use(format!("constraint '{}'", c.name())));
    }
    for constraint in schema.constraints() {
        if let ConstraintDef::ForeignKey {
            name,
            references_table,
            references_columns,
            ..
        } = constraint
        {
            if references_table == table && references_columns.iter().any(|c| c == column) {
                return Err(in_use(format!("foreign key '{name}'")));
            }
        }
    }

    Ok(())
}
