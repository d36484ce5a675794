//! Schema model for tidemark.
//!
//! Tables, columns, constraints and the snapshots built from entity declarations.

mod column;
mod constraint;
mod declaration;
mod error;
mod snapshot;
mod table;
mod types;

pub use column::{ColumnDef, DefaultValue};
pub use constraint::{ConstraintDef, DeleteBehavior};
pub use declaration::{validate_identifier, CheckDecl, EntityDecl, FieldDecl, RelationshipDecl};
pub use error::SchemaError;
pub use snapshot::SchemaSnapshot;
pub use table::TableDef;
pub use types::{ColumnType, Conversion};
