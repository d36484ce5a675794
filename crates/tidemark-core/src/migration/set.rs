//! The migrations directory: generated migration files awaiting or past application.

use super::error::MigrationError;
use super::history::HistoryStore;
use super::model::{Migration, MigrationId};
use super::status::{MigrationEntry, MigrationStatus};
use crate::catalog::SchemaSnapshot;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Migrations found in a directory, ordered by order key.
#[derive(Debug, Clone)]
pub struct MigrationSet {
    dir: PathBuf,
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Load every `<order_key>_<name>.json` file in `dir`.
    ///
    /// A missing directory yields an empty set. Files with other names are
    /// ignored. Two files sharing an order key fail with
    /// [`MigrationError::Order`].
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, MigrationError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            return Ok(Self::new(dir));
        }

        let io_err = |path: &Path, source| MigrationError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut migrations = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| io_err(&dir, e))? {
            let path = entry.map_err(|e| io_err(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(file_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<MigrationId>().ok())
            else {
                continue;
            };

            let text = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            let migration = Migration::from_json(&text).map_err(|e| {
                MigrationError::Deserialization(format!("{}: {e}", path.display()))
            })?;
            if migration.id != file_id {
                return Err(MigrationError::Deserialization(format!(
                    "{} declares id {}",
                    path.display(),
                    migration.id
                )));
            }
            debug!(migration = %migration.id, "loaded migration file");
            migrations.push(migration);
        }

        Self::from_migrations(dir, migrations)
    }

    /// Create an empty set rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            migrations: Vec::new(),
        }
    }

    /// Build a set from migrations already in memory.
    pub fn from_migrations(
        dir: impl Into<PathBuf>,
        mut migrations: Vec<Migration>,
    ) -> Result<Self, MigrationError> {
        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        for pair in migrations.windows(2) {
            if pair[0].id.order_key == pair[1].id.order_key {
                return Err(MigrationError::Order {
                    order_key: pair[1].id.order_key,
                    last_key: pair[0].id.order_key,
                });
            }
        }
        Ok(Self {
            dir: dir.into(),
            migrations,
        })
    }

    /// Directory holding the migration files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All migrations in order.
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Find a migration by name or full id.
    pub fn find(&self, reference: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id.matches(reference))
    }

    /// The newest migration.
    pub fn last(&self) -> Option<&Migration> {
        self.migrations.last()
    }

    /// Migrations not recorded in the history, in order.
    pub fn pending(&self, history: &HistoryStore) -> Result<Vec<&Migration>, MigrationError> {
        let mut pending = Vec::new();
        for migration in &self.migrations {
            if history.get_by_key(migration.id.order_key)?.is_none() {
                pending.push(migration);
            }
        }
        Ok(pending)
    }

    /// Status of every migration known to the files or the history.
    pub fn status(&self, history: &HistoryStore) -> Result<Vec<MigrationEntry>, MigrationError> {
        let mut entries: BTreeMap<u64, MigrationEntry> = BTreeMap::new();

        for record in history.list() {
            let record = record?;
            let status = match self
                .migrations
                .iter()
                .find(|m| m.id.order_key == record.order_key)
            {
                Some(file) if file.id.name == record.name && is_intact(file, &record.checksum)? => {
                    MigrationStatus::Applied
                }
                Some(_) => MigrationStatus::Modified,
                None => MigrationStatus::Missing,
            };
            entries.insert(
                record.order_key,
                MigrationEntry {
                    id: record.id(),
                    status,
                    applied_at: record.applied_at_utc(),
                    checksum: record.checksum.clone(),
                },
            );
        }

        for migration in &self.migrations {
            if entries.contains_key(&migration.id.order_key) {
                continue;
            }
            let status = if is_intact(migration, &migration.checksum)? {
                MigrationStatus::Pending
            } else {
                MigrationStatus::Modified
            };
            entries.insert(
                migration.id.order_key,
                MigrationEntry {
                    id: migration.id.clone(),
                    status,
                    applied_at: None,
                    checksum: migration.checksum.clone(),
                },
            );
        }

        Ok(entries.into_values().collect())
    }

    /// Order key for a migration generated at `now`.
    ///
    /// The timestamp as `YYYYMMDDhhmmss`, bumped past every key already used
    /// by a file or the history.
    pub fn next_order_key(
        &self,
        history: &HistoryStore,
        now: DateTime<Utc>,
    ) -> Result<u64, MigrationError> {
        let date = u64::try_from(now.year()).unwrap_or_default() * 10_000
            + u64::from(now.month()) * 100
            + u64::from(now.day());
        let time =
            u64::from(now.hour()) * 10_000 + u64::from(now.minute()) * 100 + u64::from(now.second());
        let stamp = date * 1_000_000 + time;

        let last_file = self.last().map(|m| m.id.order_key);
        let last_applied = history.last()?.map(|r| r.order_key);
        let floor = last_file.max(last_applied).map_or(0, |k| k + 1);

        Ok(stamp.max(floor))
    }

    /// Write a new migration file.
    ///
    /// Fails with [`MigrationError::Order`] unless the migration sorts after
    /// every existing file.
    pub fn write(&mut self, migration: Migration) -> Result<PathBuf, MigrationError> {
        if let Some(last) = self.last() {
            if migration.id.order_key <= last.id.order_key {
                return Err(MigrationError::Order {
                    order_key: migration.id.order_key,
                    last_key: last.id.order_key,
                });
            }
        }

        fs::create_dir_all(&self.dir).map_err(|e| MigrationError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let path = self.dir.join(migration.id.file_name());
        fs::write(&path, migration.to_json()?).map_err(|e| MigrationError::Io {
            path: path.clone(),
            source: e,
        })?;

        info!(migration = %migration.id, path = %path.display(), "migration written");
        self.migrations.push(migration);
        Ok(path)
    }

    /// Delete the newest migration file if it has not been applied.
    pub fn remove_last(&mut self, history: &HistoryStore) -> Result<Migration, MigrationError> {
        let last = self.last().ok_or_else(|| MigrationError::Conflict {
            message: "there are no migrations to remove".to_string(),
        })?;

        if history.get_by_key(last.id.order_key)?.is_some() {
            return Err(MigrationError::Conflict {
                message: format!("{} is applied; revert it before removing it", last.id),
            });
        }

        let path = self.dir.join(last.id.file_name());
        if path.exists() {
            fs::remove_file(&path).map_err(|e| MigrationError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        let removed = self
            .migrations
            .pop()
            .ok_or(MigrationError::EmptyHistory)?;
        info!(migration = %removed.id, "migration removed");
        Ok(removed)
    }

    /// The applied schema plus every pending migration's up operations.
    ///
    /// New migrations are diffed against this, so generating twice without
    /// applying does not repeat changes.
    pub fn projected_snapshot(
        &self,
        history: &HistoryStore,
    ) -> Result<SchemaSnapshot, MigrationError> {
        let mut snapshot = history.latest_applied_snapshot()?;
        for migration in self.pending(history)? {
            for op in &migration.up {
                op.apply_to(&mut snapshot)?;
            }
        }
        Ok(snapshot)
    }

    /// The schema right after `reference` is applied, counting both applied
    /// and pending migrations.
    pub fn snapshot_through(
        &self,
        history: &HistoryStore,
        reference: &str,
    ) -> Result<SchemaSnapshot, MigrationError> {
        let target = self.resolve_key(history, reference)?;
        let mut snapshot = history.snapshot_at(target)?;
        for migration in self.pending(history)? {
            if migration.id.order_key > target {
                break;
            }
            for op in &migration.up {
                op.apply_to(&mut snapshot)?;
            }
        }
        Ok(snapshot)
    }

    /// Resolve a migration name (or full id) to its order key.
    pub fn resolve_key(
        &self,
        history: &HistoryStore,
        reference: &str,
    ) -> Result<u64, MigrationError> {
        if let Some(record) = history.get(reference)? {
            return Ok(record.order_key);
        }
        self.find(reference)
            .map(|m| m.id.order_key)
            .ok_or_else(|| MigrationError::NotFound {
                name: reference.to_string(),
            })
    }
}

fn is_intact(migration: &Migration, expected: &str) -> Result<bool, MigrationError> {
    Ok(migration.checksum == expected && migration.current_checksum()? == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, TableDef};
    use crate::migration::{HistoryRecord, Operation};
    use chrono::TimeZone;

    fn migration(order_key: u64, name: &str, table: &str) -> Migration {
        let table = TableDef::new(table)
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_primary_key(["Id"]);
        Migration::new(
            MigrationId::new(order_key, name).unwrap(),
            vec![Operation::CreateTable {
                table: table.clone(),
            }],
            vec![Operation::DropTable { table }],
            Vec::new(),
        )
        .unwrap()
    }

    fn open_history(dir: &Path) -> HistoryStore {
        let db = sled::open(dir.join("db")).unwrap();
        HistoryStore::open(&db).unwrap()
    }

    #[test]
    fn test_write_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("migrations");

        let mut set = MigrationSet::load(&dir).unwrap();
        assert!(set.is_empty());

        set.write(migration(1, "Users", "Users")).unwrap();
        set.write(migration(2, "Orders", "Orders")).unwrap();
        assert!(dir.join("1_Users.json").exists());

        let loaded = MigrationSet::load(&dir).unwrap();
        let names: Vec<&str> = loaded
            .migrations()
            .iter()
            .map(|m| m.id.name.as_str())
            .collect();
        assert_eq!(names, vec!["Users", "Orders"]);
        assert!(loaded.find("Orders").is_some());
    }

    #[test]
    fn test_write_out_of_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut set = MigrationSet::new(temp_dir.path());
        set.write(migration(5, "B", "B")).unwrap();

        let err = set.write(migration(4, "A", "A")).unwrap_err();
        assert!(matches!(err, MigrationError::Order { .. }));
    }

    #[test]
    fn test_duplicate_order_keys_rejected() {
        let err = MigrationSet::from_migrations(
            "unused",
            vec![migration(1, "A", "A"), migration(1, "B", "B")],
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::Order { .. }));
    }

    #[test]
    fn test_status_and_pending() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = open_history(temp_dir.path());
        let mut set = MigrationSet::new(temp_dir.path().join("migrations"));

        let applied = migration(1, "Users", "Users");
        history
            .append(&HistoryRecord::for_migration(&applied))
            .unwrap();
        set.write(applied).unwrap();
        set.write(migration(2, "Orders", "Orders")).unwrap();

        let pending: Vec<&str> = set
            .pending(&history)
            .unwrap()
            .iter()
            .map(|m| m.id.name.as_str())
            .collect();
        assert_eq!(pending, vec!["Orders"]);

        let statuses: Vec<MigrationStatus> = set
            .status(&history)
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![MigrationStatus::Applied, MigrationStatus::Pending]
        );
    }

    #[test]
    fn test_status_detects_edits_and_missing_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = open_history(temp_dir.path());

        let gone = migration(1, "Gone", "Gone");
        history.append(&HistoryRecord::for_migration(&gone)).unwrap();

        let mut edited = migration(2, "Edited", "Edited");
        edited.down.clear();

        let set = MigrationSet::from_migrations(temp_dir.path(), vec![edited]).unwrap();
        let statuses: Vec<MigrationStatus> = set
            .status(&history)
            .unwrap()
            .into_iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            statuses,
            vec![MigrationStatus::Missing, MigrationStatus::Modified]
        );
    }

    #[test]
    fn test_next_order_key() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = open_history(temp_dir.path());
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();

        let mut set = MigrationSet::new(temp_dir.path().join("migrations"));
        assert_eq!(set.next_order_key(&history, now).unwrap(), 20240305070809);

        set.write(migration(20240305070809, "First", "First")).unwrap();
        assert_eq!(set.next_order_key(&history, now).unwrap(), 20240305070810);
    }

    #[test]
    fn test_remove_last() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = open_history(temp_dir.path());
        let dir = temp_dir.path().join("migrations");
        let mut set = MigrationSet::new(&dir);

        assert!(matches!(
            set.remove_last(&history),
            Err(MigrationError::Conflict { .. })
        ));

        let first = migration(1, "Users", "Users");
        history.append(&HistoryRecord::for_migration(&first)).unwrap();
        set.write(first).unwrap();
        set.write(migration(2, "Orders", "Orders")).unwrap();

        let removed = set.remove_last(&history).unwrap();
        assert_eq!(removed.id.name, "Orders");
        assert!(!dir.join("2_Orders.json").exists());

        // the remaining migration is applied
        assert!(matches!(
            set.remove_last(&history),
            Err(MigrationError::Conflict { .. })
        ));
        assert!(dir.join("1_Users.json").exists());
    }

    #[test]
    fn test_projected_snapshot_includes_pending() {
        let temp_dir = tempfile::tempdir().unwrap();
        let history = open_history(temp_dir.path());

        let applied = migration(1, "Users", "Users");
        history.append(&HistoryRecord::for_migration(&applied)).unwrap();
        let set = MigrationSet::from_migrations(
            temp_dir.path(),
            vec![applied, migration(2, "Orders", "Orders")],
        )
        .unwrap();

        let projected = set.projected_snapshot(&history).unwrap();
        assert_eq!(projected.table_names(), vec!["Orders", "Users"]);

        let through_first = set.snapshot_through(&history, "Users").unwrap();
        assert_eq!(through_first.table_names(), vec!["Users"]);

        assert!(matches!(
            set.snapshot_through(&history, "Nope"),
            Err(MigrationError::NotFound { .. })
        ));
    }
}
