//! Tidemark Core - schema snapshots, diffing and a transactional migration runner.
//!
//! This crate provides the engine behind the `migrate` command: it turns a
//! declared data model into a [`SchemaSnapshot`], diffs it against the
//! schema recorded in the migration history, generates reversible
//! migrations and applies them to an embedded sled store.

pub mod catalog;
pub mod error;
pub mod lock;
pub mod migration;
pub mod store;

pub use catalog::{
    ColumnDef, ColumnType, ConstraintDef, DefaultValue, DeleteBehavior, EntityDecl, FieldDecl,
    RelationshipDecl, SchemaError, SchemaSnapshot, TableDef,
};
pub use error::Error;
pub use lock::{open_store, AdvisoryLock, LockGuard};
pub use migration::{
    DiffOptions, ErrorKind, GeneratorOptions, HistoryRecord, HistoryStore, Migration,
    MigrationError, MigrationId, MigrationRunner, MigrationSet, MigrationStatus, Operation,
    RunnerConfig, SchemaDiff, ScriptGenerator, Target,
};
pub use store::{HistoryChange, SledStore, StoreConfig, StoreTransaction};
