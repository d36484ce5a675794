//! Per-migration status as reported by `list`.

use super::model::MigrationId;
use chrono::{DateTime, Utc};
use serde::Serialize as SerdeSerialize;

/// State of a migration relative to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerdeSerialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Generated, not applied.
    Pending,
    /// Applied and unchanged since.
    Applied,
    /// Content no longer matches its checksum or the applied checksum.
    Modified,
    /// Applied, but its file is gone.
    Missing,
}

impl MigrationStatus {
    /// Check if the migration is recorded in the history.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Applied | MigrationStatus::Modified | MigrationStatus::Missing
        )
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Pending => write!(f, "pending"),
            MigrationStatus::Applied => write!(f, "applied"),
            MigrationStatus::Modified => write!(f, "modified"),
            MigrationStatus::Missing => write!(f, "missing"),
        }
    }
}

/// One line of a status report.
#[derive(Debug, Clone, PartialEq, SerdeSerialize)]
pub struct MigrationEntry {
    /// Migration identity.
    #[serde(flatten)]
    pub id: MigrationId,
    /// Current status.
    pub status: MigrationStatus,
    /// When it was applied, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    /// Checksum on record (history if applied, file otherwise).
    pub checksum: String,
}
