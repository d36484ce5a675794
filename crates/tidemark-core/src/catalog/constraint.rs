//! Constraint definitions for tables.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Behavior when a referenced row is deleted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Delete referencing rows.
    Cascade,
    /// Prevent deletion if referencing rows exist.
    #[default]
    Restrict,
    /// Set the foreign key to null.
    SetNull,
    /// Defer the check to the end of the statement.
    NoAction,
}

impl DeleteBehavior {
    /// SQL spelling of the referential action.
    pub fn to_sql(self) -> &'static str {
        match self {
            DeleteBehavior::Cascade => "CASCADE",
            DeleteBehavior::Restrict => "RESTRICT",
            DeleteBehavior::SetNull => "SET NULL",
            DeleteBehavior::NoAction => "NO ACTION",
        }
    }
}

/// A constraint definition.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintDef {
    /// Uniqueness constraint (single or composite).
    Unique {
        /// Constraint name.
        name: String,
        /// Table this constraint applies to.
        table: String,
        /// Columns that must be unique together.
        columns: Vec<String>,
    },
    /// Foreign key constraint.
    ForeignKey {
        /// Constraint name.
        name: String,
        /// Table containing the foreign key.
        table: String,
        /// Foreign key columns.
        columns: Vec<String>,
        /// Referenced table.
        references_table: String,
        /// Referenced columns (usually the primary key).
        references_columns: Vec<String>,
        /// Referential action on delete.
        #[serde(default)]
        on_delete: DeleteBehavior,
    },
    /// Check constraint (expression must evaluate to true).
    Check {
        /// Constraint name.
        name: String,
        /// Table this constraint applies to.
        table: String,
        /// Boolean expression.
        expression: String,
    },
}

impl ConstraintDef {
    /// Create a unique constraint on a single column.
    pub fn unique(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        ConstraintDef::Unique {
            name: name.into(),
            table: table.into(),
            columns: vec![column.into()],
        }
    }

    /// Create a composite unique constraint.
    pub fn unique_composite(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        ConstraintDef::Unique {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a single-column foreign key constraint.
    pub fn foreign_key(
        name: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        ConstraintDef::ForeignKey {
            name: name.into(),
            table: table.into(),
            columns: vec![column.into()],
            references_table: references_table.into(),
            references_columns: vec![references_column.into()],
            on_delete: DeleteBehavior::default(),
        }
    }

    /// Create a check constraint.
    pub fn check(
        name: impl Into<String>,
        table: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        ConstraintDef::Check {
            name: name.into(),
            table: table.into(),
            expression: expression.into(),
        }
    }

    /// Set the delete behavior of a foreign key. No effect on other kinds.
    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        if let ConstraintDef::ForeignKey { on_delete, .. } = &mut self {
            *on_delete = behavior;
        }
        self
    }

    /// Get the constraint name.
    pub fn name(&self) -> &str {
        match self {
            ConstraintDef::Unique { name, .. } => name,
            ConstraintDef::ForeignKey { name, .. } => name,
            ConstraintDef::Check { name, .. } => name,
        }
    }

    /// Get the table this constraint applies to.
    pub fn table(&self) -> &str {
        match self {
            ConstraintDef::Unique { table, .. } => table,
            ConstraintDef::ForeignKey { table, .. } => table,
            ConstraintDef::Check { table, .. } => table,
        }
    }

    /// Columns of the owning table this constraint covers.
    pub fn columns(&self) -> &[String] {
        match self {
            ConstraintDef::Unique { columns, .. } => columns,
            ConstraintDef::ForeignKey { columns, .. } => columns,
            ConstraintDef::Check { .. } => &[],
        }
    }

    /// The table referenced by a foreign key.
    pub fn referenced_table(&self) -> Option<&str> {
        match self {
            ConstraintDef::ForeignKey {
                references_table, ..
            } => Some(references_table),
            _ => None,
        }
    }

    /// Check if this is a unique constraint.
    pub fn is_unique(&self) -> bool {
        matches!(self, ConstraintDef::Unique { .. })
    }

    /// Check if this is a foreign key constraint.
    pub fn is_foreign_key(&self) -> bool {
        matches!(self, ConstraintDef::ForeignKey { .. })
    }

    /// Check if this is a check constraint.
    pub fn is_check(&self) -> bool {
        matches!(self, ConstraintDef::Check { .. })
    }

    /// Rename the owning table.
    pub(crate) fn rename_table(&mut self, from: &str, to: &str) {
        match self {
            ConstraintDef::Unique { table, .. }
            | ConstraintDef::Check { table, .. } => {
                if table == from {
                    *table = to.to_string();
                }
            }
            ConstraintDef::ForeignKey {
                table,
                references_table,
                ..
            } => {
                if table == from {
                    *table = to.to_string();
                }
                if references_table == from {
                    *references_table = to.to_string();
                }
            }
        }
    }

    /// Rename a column of `owner`, wherever this constraint mentions it.
    pub(crate) fn rename_column(&mut self, owner: &str, from: &str, to: &str) {
        let rename = |cols: &mut Vec<String>| {
            for col in cols.iter_mut().filter(|c| c.as_str() == from) {
                *col = to.to_string();
            }
        };

        match self {
            ConstraintDef::Unique { table, columns, .. } => {
                if table == owner {
                    rename(columns);
                }
            }
            ConstraintDef::ForeignKey {
                table,
                columns,
                references_table,
                references_columns,
                ..
            } => {
                if table == owner {
                    rename(columns);
                }
                if references_table == owner {
                    rename(references_columns);
                }
            }
            ConstraintDef::Check { .. } => {}
        }
    }

    /// Render the constraint body as used by `ADD CONSTRAINT`.
    pub fn to_sql(&self) -> String {
        let quote = |cols: &[String]| {
            cols.iter()
                .map(|c| format!("\"{c}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };

        match self {
            ConstraintDef::Unique { name, columns, .. } => {
                format!("CONSTRAINT \"{name}\" UNIQUE ({})", quote(columns))
            }
            ConstraintDef::ForeignKey {
                name,
                columns,
                references_table,
                references_columns,
                on_delete,
                ..
            } => format!(
                "CONSTRAINT \"{name}\" FOREIGN KEY ({}) REFERENCES \"{references_table}\" ({}) ON DELETE {}",
                quote(columns),
                quote(references_columns),
                on_delete.to_sql()
            ),
            ConstraintDef::Check {
                name, expression, ..
            } => format!("CONSTRAINT \"{name}\" CHECK ({expression})"),
        }
    }
}
