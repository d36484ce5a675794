//! Migrations and the history records they leave behind.

use super::error::MigrationError;
use super::operation::Operation;
use crate::error::aligned;
use chrono::{DateTime, Utc};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a migration: a monotonic order key plus a name.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerdeSerialize, SerdeDeserialize,
)]
pub struct MigrationId {
    /// Position in the history; strictly increasing.
    pub order_key: u64,
    /// Human chosen name.
    pub name: String,
}

impl MigrationId {
    /// Create an identifier, validating the name.
    pub fn new(order_key: u64, name: impl Into<String>) -> Result<Self, MigrationError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { order_key, name })
    }

    /// File name of the migration (`<order_key>_<name>.json`).
    pub fn file_name(&self) -> String {
        format!("{self}.json")
    }

    /// Whether `reference` names this migration, either by name or by full id.
    pub fn matches(&self, reference: &str) -> bool {
        self.name == reference || self.to_string() == reference
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.order_key, self.name)
    }
}

impl FromStr for MigrationId {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MigrationError::Deserialization(format!("invalid migration id '{s}'"));
        let (key, name) = s.split_once('_').ok_or_else(invalid)?;
        let order_key = key.parse().map_err(|_| invalid())?;
        Self::new(order_key, name)
    }
}

/// Check that a migration name is usable in a file name.
pub fn validate_name(name: &str) -> Result<(), MigrationError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(MigrationError::Validation(
            crate::catalog::SchemaError::InvalidName(name.to_string()),
        ))
    }
}

/// A named, ordered, reversible unit of schema change.
///
/// Immutable once applied: the checksum covers the identity and both
/// operation lists, so edits after generation are detected.
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct Migration {
    /// Identity.
    #[serde(flatten)]
    pub id: MigrationId,
    /// Forward operations, in execution order.
    pub up: Vec<Operation>,
    /// Reverse operations, in execution order.
    pub down: Vec<Operation>,
    /// Hex encoded blake3 digest of identity and operations.
    pub checksum: String,
    /// Data loss notes recorded at generation time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// When the migration was generated.
    pub created_at: DateTime<Utc>,
}

impl Migration {
    /// Create a migration and compute its checksum.
    pub fn new(
        id: MigrationId,
        up: Vec<Operation>,
        down: Vec<Operation>,
        warnings: Vec<String>,
    ) -> Result<Self, MigrationError> {
        let checksum = compute_checksum(&id, &up, &down)?;
        Ok(Self {
            id,
            up,
            down,
            checksum,
            warnings,
            created_at: Utc::now(),
        })
    }

    /// Recompute the checksum from the current content.
    pub fn current_checksum(&self) -> Result<String, MigrationError> {
        compute_checksum(&self.id, &self.up, &self.down)
    }

    /// Fail with [`MigrationError::ChecksumMismatch`] if the content was edited.
    pub fn verify_checksum(&self) -> Result<(), MigrationError> {
        let actual = self.current_checksum()?;
        if actual == self.checksum {
            Ok(())
        } else {
            Err(MigrationError::ChecksumMismatch {
                migration: self.id.to_string(),
                expected: self.checksum.clone(),
                actual,
            })
        }
    }

    /// Serialize to pretty printed JSON.
    pub fn to_json(&self) -> Result<String, MigrationError> {
        serde_json::to_string_pretty(self).map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, MigrationError> {
        serde_json::from_str(json).map_err(|e| MigrationError::Deserialization(e.to_string()))
    }
}

/// Digest over the identity and both operation lists.
pub fn compute_checksum(
    id: &MigrationId,
    up: &[Operation],
    down: &[Operation],
) -> Result<String, MigrationError> {
    let canonical = serde_json::to_vec(&(id.order_key, &id.name, up, down))
        .map_err(|e| MigrationError::Serialization(e.to_string()))?;
    Ok(hex::encode(blake3::hash(&canonical).as_bytes()))
}

/// One applied migration as recorded in the history.
///
/// Records carry their operations, so the applied schema can be replayed
/// and the tail reverted without the migration file.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct HistoryRecord {
    /// Order key of the migration.
    pub order_key: u64,
    /// Name of the migration.
    pub name: String,
    /// When it was applied (microseconds since Unix epoch).
    pub applied_at: u64,
    /// Checksum of the migration at the time it was applied.
    pub checksum: String,
    /// Forward operations.
    pub up: Vec<Operation>,
    /// Reverse operations.
    pub down: Vec<Operation>,
}

impl HistoryRecord {
    /// Build the record for applying `migration` now.
    pub fn for_migration(migration: &Migration) -> Self {
        Self {
            order_key: migration.id.order_key,
            name: migration.id.name.clone(),
            applied_at: current_timestamp(),
            checksum: migration.checksum.clone(),
            up: migration.up.clone(),
            down: migration.down.clone(),
        }
    }

    /// Identity of the recorded migration.
    pub fn id(&self) -> MigrationId {
        MigrationId {
            order_key: self.order_key,
            name: self.name.clone(),
        }
    }

    /// Application time as a date.
    pub fn applied_at_utc(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.applied_at)
            .ok()
            .and_then(DateTime::from_timestamp_micros)
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned(bytes))
            .map_err(|e| MigrationError::Deserialization(e.to_string()))
    }
}

/// Current time in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or_default()
}
