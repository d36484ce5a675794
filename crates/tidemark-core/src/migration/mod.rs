//! Migration engine.
//!
//! This module provides versioned schema evolution with:
//! - Declared-versus-applied schema diffing
//! - Reversible migration generation (up and down operations)
//! - An ordered, persisted history of applied migrations
//! - Transactional apply and revert under an advisory lock
//!
//! # Workflow
//!
//! | Step | Type | What it does |
//! |------|------|--------------|
//! | Diff | [`SchemaDiff`] | Operations turning the applied schema into the declared one |
//! | Generate | [`ScriptGenerator`] | Pairs them with inverses into a checksummed [`Migration`] |
//! | Store | [`MigrationSet`] | Writes `<order_key>_<name>.json` into the migrations directory |
//! | Apply | [`MigrationRunner`] | Runs pending migrations, one transaction each, recording [`HistoryRecord`]s |
//!
//! # Example
//!
//! ```ignore
//! use tidemark_core::migration::{DiffOptions, MigrationRunner, SchemaDiff, ScriptGenerator};
//!
//! let applied = store.history().latest_applied_snapshot()?;
//! let up = SchemaDiff::compute(&declared, &applied, &DiffOptions::new())?;
//! let migration = ScriptGenerator::generate(id, up, &GeneratorOptions::default())?;
//! MigrationRunner::default().apply(&migration, &store)?;
//! ```

pub mod diff;
pub mod error;
pub mod generator;
pub mod history;
pub mod model;
pub mod operation;
pub mod runner;
pub mod set;
pub mod sql;
pub mod status;

// Diff types
pub use diff::{DiffOptions, SchemaDiff};

// Error types
pub use error::{ErrorKind, MigrationError};

// Generator types
pub use generator::{GeneratorOptions, ScriptGenerator};

// History types
pub use history::{HistoryIter, HistoryStore};

// Model types
pub use model::{
    compute_checksum, current_timestamp, validate_name, HistoryRecord, Migration, MigrationId,
};

// Operation types
pub use operation::{Inversion, Operation, OperationKind};

// Runner types
pub use runner::{
    CancelFlag, MigrationRunner, ProgressFn, RunReport, RunnerConfig, StepProgress, Target,
};

// Migration directory types
pub use set::MigrationSet;
pub use status::{MigrationEntry, MigrationStatus};

// Rendering
pub use sql::{operation_sql, render_migration, render_operations, Direction};
