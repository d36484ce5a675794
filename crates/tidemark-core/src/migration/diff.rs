//! Schema diffing algorithm.
//!
//! Compares the declared schema against the applied one and produces the
//! ordered list of operations that turns the applied schema into the
//! declared one.

use super::error::MigrationError;
use super::operation::Operation;
use crate::catalog::{ColumnDef, Conversion, SchemaSnapshot, TableDef};
use std::collections::{BTreeMap, BTreeSet};

/// Options controlling how a diff is computed.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Permit changes that lose data.
    pub allow_destructive: bool,
    /// Tables known to hold rows in the target store.
    pub populated_tables: BTreeSet<String>,
    /// Table renames, old name to new name.
    pub renamed_tables: BTreeMap<String, String>,
    /// Column renames keyed by (table, old column), using the new table name.
    pub renamed_columns: BTreeMap<(String, String), String>,
}

impl DiffOptions {
    /// Create default options: destructive changes refused, no rows known.
    pub fn new() -> Self {
        Self::default()
    }

    /// Permit or refuse destructive changes.
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }

    /// Mark a table as holding rows.
    pub fn with_populated_table(mut self, table: impl Into<String>) -> Self {
        self.populated_tables.insert(table.into());
        self
    }

    /// Record that a table was renamed rather than dropped and recreated.
    pub fn with_table_rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renamed_tables.insert(from.into(), to.into());
        self
    }

    /// Record that a column was renamed rather than dropped and re-added.
    pub fn with_column_rename(
        mut self,
        table: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.renamed_columns
            .insert((table.into(), from.into()), to.into());
        self
    }

    fn is_populated(&self, table: &str) -> bool {
        self.populated_tables.contains(table)
    }
}

/// Operations between two snapshots, grouped by execution phase.
///
/// The phases run in field order. Constraints are dropped before anything
/// they depend on disappears and added only after everything they
/// reference exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    /// Table and column renames.
    pub renames: Vec<Operation>,
    /// Constraints that vanish or change.
    pub drop_constraints: Vec<Operation>,
    /// New tables, without constraints.
    pub create_tables: Vec<Operation>,
    /// New columns on existing tables.
    pub add_columns: Vec<Operation>,
    /// Column changes that keep or tighten nullability.
    pub alter_columns: Vec<Operation>,
    /// Primary key changes. They run after columns entering the key become
    /// NOT NULL and before columns leaving it become nullable.
    pub alter_primary_keys: Vec<Operation>,
    /// Column changes that make a column nullable.
    pub relax_columns: Vec<Operation>,
    /// Constraints that appear or change.
    pub add_constraints: Vec<Operation>,
    /// Removed columns.
    pub drop_columns: Vec<Operation>,
    /// Removed tables.
    pub drop_tables: Vec<Operation>,
    /// Descriptions of changes that lose data.
    pub destructive: Vec<String>,
}

impl SchemaDiff {
    /// Compute the operations turning `applied` into `declared`.
    ///
    /// Fails with [`MigrationError::UnresolvableDiff`] when a change loses
    /// data and `options.allow_destructive` is not set.
    pub fn compute(
        declared: &SchemaSnapshot,
        applied: &SchemaSnapshot,
        options: &DiffOptions,
    ) -> Result<Vec<Operation>, MigrationError> {
        let diff = Self::between(declared, applied, options)?;

        if !diff.destructive.is_empty() && !options.allow_destructive {
            return Err(MigrationError::UnresolvableDiff {
                changes: diff.destructive,
            });
        }

        Ok(diff.into_operations())
    }

    /// Classify every difference without enforcing the destructive policy.
    pub fn between(
        declared: &SchemaSnapshot,
        applied: &SchemaSnapshot,
        options: &DiffOptions,
    ) -> Result<Self, MigrationError> {
        let mut diff = SchemaDiff::default();
        let applied = diff.apply_renames(applied, options)?;

        for (name, table) in &applied.tables {
            if !declared.contains(name) {
                diff.remove_table(table, options);
            }
        }

        for (name, table) in &declared.tables {
            match applied.table(name) {
                Some(current) => diff.diff_table(current, table, options),
                None => diff.add_table(table),
            }
        }

        Ok(diff)
    }

    /// Check if there are any changes.
    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }

    /// Get the total number of operations.
    pub fn change_count(&self) -> usize {
        self.renames.len()
            + self.drop_constraints.len()
            + self.create_tables.len()
            + self.add_columns.len()
            + self.alter_columns.len()
            + self.alter_primary_keys.len()
            + self.relax_columns.len()
            + self.add_constraints.len()
            + self.drop_columns.len()
            + self.drop_tables.len()
    }

    /// Flatten the phases into execution order.
    pub fn into_operations(self) -> Vec<Operation> {
        let mut ops = Vec::with_capacity(self.change_count());
        ops.extend(self.renames);
        ops.extend(self.drop_constraints);
        ops.extend(self.create_tables);
        ops.extend(self.add_columns);
        ops.extend(self.alter_columns);
        ops.extend(self.alter_primary_keys);
        ops.extend(self.relax_columns);
        ops.extend(self.add_constraints);
        ops.extend(self.drop_columns);
        ops.extend(self.drop_tables);
        ops
    }

    fn apply_renames(
        &mut self,
        applied: &SchemaSnapshot,
        options: &DiffOptions,
    ) -> Result<SchemaSnapshot, MigrationError> {
        let mut renamed = applied.clone();

        for (from, to) in &options.renamed_tables {
            let op = Operation::RenameTable {
                from: from.clone(),
                to: to.clone(),
            };
            op.apply_to(&mut renamed)?;
            self.renames.push(op);
        }

        for ((table, from), to) in &options.renamed_columns {
            let op = Operation::RenameColumn {
                table: table.clone(),
                from: from.clone(),
                to: to.clone(),
            };
            op.apply_to(&mut renamed)?;
            self.renames.push(op);
        }

        Ok(renamed)
    }

    fn add_table(&mut self, table: &TableDef) {
        self.create_tables.push(Operation::CreateTable {
            table: table.without_constraints(),
        });
        for constraint in table.constraints.values() {
            self.add_constraints.push(Operation::AddConstraint {
                constraint: constraint.clone(),
            });
        }
    }

    fn remove_table(&mut self, table: &TableDef, options: &DiffOptions) {
        for constraint in table.constraints.values() {
            self.drop_constraints.push(Operation::DropConstraint {
                constraint: constraint.clone(),
            });
        }
        if options.is_populated(&table.name) {
            self.destructive
                .push(format!("drop table {} which holds rows", table.name));
        }
        self.drop_tables.push(Operation::DropTable {
            table: table.without_constraints(),
        });
    }

    fn diff_table(&mut self, from: &TableDef, to: &TableDef, options: &DiffOptions) {
        let populated = options.is_populated(&to.name);

        for (name, constraint) in &from.constraints {
            if to.constraint(name) != Some(constraint) {
                self.drop_constraints.push(Operation::DropConstraint {
                    constraint: constraint.clone(),
                });
            }
        }

        for (name, column) in &to.columns {
            match from.column(name) {
                None => self.add_columns.push(Operation::AddColumn {
                    table: to.name.clone(),
                    column: column.clone(),
                }),
                Some(current) if current != column => {
                    self.alter_column(&to.name, current, column, populated)
                }
                Some(_) => {}
            }
        }

        if from.primary_key != to.primary_key {
            if populated {
                self.destructive.push(format!(
                    "change primary key of {} which holds rows from ({}) to ({})",
                    to.name,
                    from.primary_key.join(", "),
                    to.primary_key.join(", ")
                ));
            }
            self.alter_primary_keys.push(Operation::AlterPrimaryKey {
                table: to.name.clone(),
                from: from.primary_key.clone(),
                to: to.primary_key.clone(),
            });
        }

        for (name, constraint) in &to.constraints {
            if from.constraint(name) != Some(constraint) {
                self.add_constraints.push(Operation::AddConstraint {
                    constraint: constraint.clone(),
                });
            }
        }

        for (name, column) in &from.columns {
            if !to.has_column(name) {
                self.drop_columns.push(Operation::DropColumn {
                    table: from.name.clone(),
                    column: column.clone(),
                });
            }
        }
    }

    fn alter_column(&mut self, table: &str, from: &ColumnDef, to: &ColumnDef, populated: bool) {
        if from.column_type.conversion_to(&to.column_type) == Conversion::Narrowing {
            self.destructive.push(format!(
                "narrow {table}.{} from {} to {}",
                to.name, from.column_type, to.column_type
            ));
        }
        if populated && from.nullable && !to.nullable && to.default.is_none() {
            self.destructive.push(format!(
                "make {table}.{} NOT NULL without a default while the table holds rows",
                to.name
            ));
        }
        let op = Operation::AlterColumn {
            table: table.to_string(),
            from: from.clone(),
            to: to.clone(),
        };
        if to.nullable && !from.nullable {
            self.relax_columns.push(op);
        } else {
            self.alter_columns.push(op);
        }
    }
}
