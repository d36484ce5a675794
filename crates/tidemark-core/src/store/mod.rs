//! Embedded store that migrations are applied to.
//!
//! Built on sled. The catalog tree holds rkyv encoded table definitions, the
//! rows tree holds JSON rows keyed by table and primary key, and the history
//! tree holds the migration ledger. A [`StoreTransaction`] commits changes to
//! all three atomically.

mod config;
mod engine;
mod transaction;

pub use config::StoreConfig;
pub use engine::{Row, SledStore};
pub use transaction::{HistoryChange, StoreTransaction};
