//! CLI errors and their exit codes.

use std::path::PathBuf;
use thiserror::Error;
use tidemark_core::migration::{ErrorKind, MigrationError};

/// Errors surfaced by a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Error from the migration engine.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The entity declarations file could not be parsed.
    #[error("invalid schema file {}: {reason}", .path.display())]
    Schema {
        /// The schema file.
        path: PathBuf,
        /// Parse failure.
        reason: String,
    },

    /// A command-line value could not be parsed.
    #[error("invalid value '{value}' for {flag}: expected {expected}")]
    InvalidArgument {
        /// Flag name.
        flag: &'static str,
        /// Offending value.
        value: String,
        /// Expected shape.
        expected: &'static str,
    },

    /// The configuration file could not be read or parsed.
    #[error("configuration error in {}: {reason}", .path.display())]
    Config {
        /// The configuration file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// File system error.
    #[error("{}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl From<tidemark_core::Error> for CliError {
    fn from(e: tidemark_core::Error) -> Self {
        CliError::Migration(e.into())
    }
}

impl From<tidemark_core::SchemaError> for CliError {
    fn from(e: tidemark_core::SchemaError) -> Self {
        CliError::Migration(e.into())
    }
}

impl CliError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Migration(e) => match e.kind() {
                ErrorKind::UnresolvableDiff => 1,
                ErrorKind::LockTimeout => 2,
                ErrorKind::Execution | ErrorKind::Cancelled => 3,
                ErrorKind::Conflict => 4,
                ErrorKind::Validation => 5,
                ErrorKind::Order => 6,
                ErrorKind::EmptyHistory => 7,
                ErrorKind::IrreversibleOperation => 8,
                ErrorKind::NotFound => 9,
                ErrorKind::ChecksumMismatch => 10,
                ErrorKind::Storage => 11,
            },
            CliError::Schema { .. } | CliError::InvalidArgument { .. } => 5,
            CliError::Config { .. } | CliError::Io { .. } => 11,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            CliError::from(MigrationError::UnresolvableDiff { changes: vec![] }),
            CliError::from(MigrationError::LockTimeout {
                store: "s".into(),
                waited: std::time::Duration::ZERO,
            }),
            CliError::from(MigrationError::Cancelled {
                migration: "m".into(),
            }),
            CliError::from(MigrationError::Conflict {
                message: "c".into(),
            }),
            CliError::from(tidemark_core::SchemaError::InvalidName("x y".into())),
            CliError::from(MigrationError::Order {
                order_key: 1,
                last_key: 2,
            }),
            CliError::from(MigrationError::EmptyHistory),
            CliError::from(MigrationError::IrreversibleOperation { operations: vec![] }),
            CliError::from(MigrationError::NotFound { name: "n".into() }),
            CliError::from(MigrationError::ChecksumMismatch {
                migration: "m".into(),
                expected: "a".into(),
                actual: "b".into(),
            }),
        ];
        let codes: Vec<u8> = errors.iter().map(CliError::exit_code).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }
}
