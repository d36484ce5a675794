//! Migration-specific error types.

use crate::catalog::SchemaError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`MigrationError`].
///
/// Callers that need to react per kind (such as a command line front end
/// choosing an exit status) match on this instead of on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The declared schema is inconsistent.
    Validation,
    /// History ordering would be violated.
    Order,
    /// There is nothing to revert.
    EmptyHistory,
    /// A change cannot be expressed without data loss.
    UnresolvableDiff,
    /// An operation has no safe inverse.
    IrreversibleOperation,
    /// The advisory lock could not be acquired in time.
    LockTimeout,
    /// The store rejected an operation; the transaction was rolled back.
    Execution,
    /// The run was cancelled; the transaction was rolled back.
    Cancelled,
    /// Unknown migration name.
    NotFound,
    /// Disallowed state transition.
    Conflict,
    /// A migration's content no longer matches its checksum.
    ChecksumMismatch,
    /// Storage, encoding or file system failure.
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Order => write!(f, "order"),
            ErrorKind::EmptyHistory => write!(f, "empty_history"),
            ErrorKind::UnresolvableDiff => write!(f, "unresolvable_diff"),
            ErrorKind::IrreversibleOperation => write!(f, "irreversible_operation"),
            ErrorKind::LockTimeout => write!(f, "lock_timeout"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Conflict => write!(f, "conflict"),
            ErrorKind::ChecksumMismatch => write!(f, "checksum_mismatch"),
            ErrorKind::Storage => write!(f, "storage"),
        }
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Declared schema or operation sequence is inconsistent.
    #[error("schema validation failed: {0}")]
    Validation(#[from] SchemaError),

    /// A record's order key does not follow the last applied one.
    #[error("order key {order_key} must be greater than the last applied key {last_key}")]
    Order {
        /// Offending order key.
        order_key: u64,
        /// Key of the last record in history.
        last_key: u64,
    },

    /// The history has no records.
    #[error("migration history is empty")]
    EmptyHistory,

    /// The diff contains changes that would lose data.
    #[error("changes would lose data (pass allow-destructive to proceed): {}", .changes.join("; "))]
    UnresolvableDiff {
        /// Description of each destructive change.
        changes: Vec<String>,
    },

    /// Operations without a safe inverse.
    #[error("operations cannot be reverted safely (pass accept-irreversible to proceed): {}", .operations.join("; "))]
    IrreversibleOperation {
        /// Description of each irreversible operation.
        operations: Vec<String>,
    },

    /// Timed out waiting for the advisory lock.
    #[error("timed out after {waited:?} waiting for the migration lock on {store}")]
    LockTimeout {
        /// Store identity.
        store: String,
        /// How long we waited.
        waited: Duration,
    },

    /// The store rejected an operation. Nothing was committed.
    #[error("{migration} failed{}: {reason}", failure_site(.index, .operation))]
    Execution {
        /// Migration being applied or reverted.
        migration: String,
        /// Index of the failing operation, if an operation failed.
        index: Option<usize>,
        /// Description of the failing operation.
        operation: String,
        /// Why it failed.
        reason: String,
    },

    /// The run was cancelled before commit.
    #[error("{migration} was cancelled and rolled back")]
    Cancelled {
        /// Migration that was in flight.
        migration: String,
    },

    /// Unknown migration name.
    #[error("migration not found: {name}")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// Disallowed state transition.
    #[error("conflict: {message}")]
    Conflict {
        /// What was attempted.
        message: String,
    },

    /// A migration was edited after it was generated or applied.
    #[error("checksum mismatch for {migration}: expected {expected}, found {actual}")]
    ChecksumMismatch {
        /// The migration.
        migration: String,
        /// Recorded checksum.
        expected: String,
        /// Checksum of the current content.
        actual: String,
    },

    /// History could not be replayed.
    #[error("migration state corrupted: {message}")]
    StateCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// File system error.
    #[error("{}: {source}", .path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

fn failure_site(index: &Option<usize>, operation: &str) -> String {
    match index {
        Some(i) => format!(" at operation {} ({operation})", i + 1),
        None => String::new(),
    }
}

impl MigrationError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Validation(_) => ErrorKind::Validation,
            MigrationError::Order { .. } => ErrorKind::Order,
            MigrationError::EmptyHistory => ErrorKind::EmptyHistory,
            MigrationError::UnresolvableDiff { .. } => ErrorKind::UnresolvableDiff,
            MigrationError::IrreversibleOperation { .. } => ErrorKind::IrreversibleOperation,
            MigrationError::LockTimeout { .. } => ErrorKind::LockTimeout,
            MigrationError::Execution { .. } => ErrorKind::Execution,
            MigrationError::Cancelled { .. } => ErrorKind::Cancelled,
            MigrationError::NotFound { .. } => ErrorKind::NotFound,
            MigrationError::Conflict { .. } => ErrorKind::Conflict,
            MigrationError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            MigrationError::StateCorrupted { .. }
            | MigrationError::Storage(_)
            | MigrationError::Serialization(_)
            | MigrationError::Deserialization(_)
            | MigrationError::Io { .. } => ErrorKind::Storage,
        }
    }
}

impl From<sled::Error> for MigrationError {
    fn from(e: sled::Error) -> Self {
        MigrationError::Storage(crate::error::Error::Storage(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(MigrationError::EmptyHistory.kind(), ErrorKind::EmptyHistory);
        assert_eq!(
            MigrationError::Order {
                order_key: 1,
                last_key: 2
            }
            .kind(),
            ErrorKind::Order
        );
        assert_eq!(
            MigrationError::from(SchemaError::InvalidName("x y".into())).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            MigrationError::StateCorrupted {
                message: "bad".into()
            }
            .kind(),
            ErrorKind::Storage
        );
    }

    #[test]
    fn test_execution_display() {
        let err = MigrationError::Execution {
            migration: "20240101000000_Init".to_string(),
            index: Some(1),
            operation: "add column Users.Age".to_string(),
            reason: "column 'Users.Age' already exists".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "20240101000000_Init failed at operation 2 (add column Users.Age): column 'Users.Age' already exists"
        );

        let err = MigrationError::Execution {
            migration: "20240101000000_Init".to_string(),
            index: None,
            operation: String::new(),
            reason: "transaction timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "20240101000000_Init failed: transaction timed out"
        );
    }

    #[test]
    fn test_unresolvable_display() {
        let err = MigrationError::UnresolvableDiff {
            changes: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().ends_with("a; b"));
    }
}
