//! Schema consistency errors.

use thiserror::Error;

/// Errors raised when a declared schema or a schema operation is inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A table does not exist.
    #[error("unknown table '{table}'")]
    UnknownTable {
        /// The missing table.
        table: String,
    },

    /// A column does not exist.
    #[error("unknown column '{table}.{column}'")]
    UnknownColumn {
        /// Table that was searched.
        table: String,
        /// The missing column.
        column: String,
    },

    /// A table already exists.
    #[error("table '{table}' already exists")]
    TableExists {
        /// The duplicate table.
        table: String,
    },

    /// A column already exists.
    #[error("column '{table}.{column}' already exists")]
    ColumnExists {
        /// Table holding the column.
        table: String,
        /// The duplicate column.
        column: String,
    },

    /// A constraint name is already taken on a table.
    #[error("constraint '{constraint}' already exists on '{table}'")]
    ConstraintExists {
        /// Table holding the constraint.
        table: String,
        /// The duplicate constraint.
        constraint: String,
    },

    /// A constraint does not exist.
    #[error("unknown constraint '{constraint}' on '{table}'")]
    UnknownConstraint {
        /// Table that was searched.
        table: String,
        /// The missing constraint.
        constraint: String,
    },

    /// A table is still referenced by a foreign key.
    #[error("table '{table}' is referenced by foreign key '{by}'")]
    TableReferenced {
        /// The referenced table.
        table: String,
        /// The referencing constraint.
        by: String,
    },

    /// A column is still used by the primary key or a constraint.
    #[error("column '{table}.{column}' is used by {by}")]
    ColumnInUse {
        /// Table holding the column.
        table: String,
        /// The column in use.
        column: String,
        /// What uses it.
        by: String,
    },

    /// A table has no primary key.
    #[error("table '{table}' declares no primary key")]
    MissingPrimaryKey {
        /// The keyless table.
        table: String,
    },

    /// Two declarations of the same table disagree about its primary key.
    #[error("conflicting primary keys for '{table}': ({first}) vs ({second})")]
    ConflictingPrimaryKey {
        /// The table.
        table: String,
        /// Key from the first declaration.
        first: String,
        /// Key from the conflicting declaration.
        second: String,
    },

    /// A primary key column accepts NULL.
    #[error("primary key column '{table}.{column}' must not be nullable")]
    NullableKey {
        /// The table.
        table: String,
        /// The nullable column.
        column: String,
    },

    /// Two declarations of the same column disagree.
    #[error("conflicting declarations of column '{table}.{column}'")]
    ConflictingColumn {
        /// The table.
        table: String,
        /// The column.
        column: String,
    },

    /// A relationship is malformed.
    #[error("invalid reference '{constraint}': {reason}")]
    InvalidReference {
        /// Constraint being declared.
        constraint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A column type could not be parsed.
    #[error("invalid column type '{0}'")]
    InvalidType(String),

    /// An identifier is empty or contains unsupported characters.
    #[error("invalid identifier '{0}'")]
    InvalidName(String),
}
