//! History store - the persisted ledger of applied migrations.
//!
//! Records are keyed by order key (big endian), so sled's ordered iteration
//! yields them in application order and the tail is the maximum key.

use super::error::MigrationError;
use super::model::HistoryRecord;
use crate::catalog::SchemaSnapshot;
use tracing::debug;

/// Ordered, append-mostly log of applied migrations.
#[derive(Clone)]
pub struct HistoryStore {
    tree: sled::Tree,
}

impl HistoryStore {
    /// Tree name for history records.
    pub const TREE_NAME: &'static str = "tidemark:history";

    /// Open or create the history store.
    pub fn open(db: &sled::Db) -> Result<Self, MigrationError> {
        Ok(Self::from_tree(db.open_tree(Self::TREE_NAME)?))
    }

    pub(crate) fn from_tree(tree: sled::Tree) -> Self {
        Self { tree }
    }

    /// The underlying tree, for use in multi-tree transactions.
    pub(crate) fn tree(&self) -> &sled::Tree {
        &self.tree
    }

    /// Encode an order key.
    pub(crate) fn key(order_key: u64) -> [u8; 8] {
        order_key.to_be_bytes()
    }

    /// Fail with [`MigrationError::Order`] unless `order_key` would follow the tail.
    pub fn check_append(&self, order_key: u64) -> Result<(), MigrationError> {
        if let Some(last) = self.last()? {
            if order_key <= last.order_key {
                return Err(MigrationError::Order {
                    order_key,
                    last_key: last.order_key,
                });
            }
        }
        Ok(())
    }

    /// Append a record.
    pub fn append(&self, record: &HistoryRecord) -> Result<(), MigrationError> {
        self.check_append(record.order_key)?;
        self.tree
            .insert(Self::key(record.order_key), record.to_bytes()?)?;
        debug!(migration = %record.id(), "history record appended");
        Ok(())
    }

    /// Remove and return the most recent record.
    pub fn remove_last(&self) -> Result<HistoryRecord, MigrationError> {
        match self.tree.pop_max()? {
            Some((_, value)) => {
                let record = HistoryRecord::from_bytes(&value)?;
                debug!(migration = %record.id(), "history record removed");
                Ok(record)
            }
            None => Err(MigrationError::EmptyHistory),
        }
    }

    /// The most recent record.
    pub fn last(&self) -> Result<Option<HistoryRecord>, MigrationError> {
        match self.tree.last()? {
            Some((_, value)) => Ok(Some(HistoryRecord::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    /// Find a record by name or full id.
    pub fn get(&self, reference: &str) -> Result<Option<HistoryRecord>, MigrationError> {
        for record in self.list() {
            let record = record?;
            if record.id().matches(reference) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Find a record by order key.
    pub fn get_by_key(&self, order_key: u64) -> Result<Option<HistoryRecord>, MigrationError> {
        match self.tree.get(Self::key(order_key))? {
            Some(value) => Ok(Some(HistoryRecord::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    /// Number of applied migrations.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if no migration has been applied.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Iterate over the records in order.
    ///
    /// The iterator is lazy and finite; call `list` again to start over.
    pub fn list(&self) -> HistoryIter {
        HistoryIter {
            inner: self.tree.iter(),
        }
    }

    /// Rebuild the applied schema by replaying every record's up operations.
    pub fn latest_applied_snapshot(&self) -> Result<SchemaSnapshot, MigrationError> {
        let mut snapshot = SchemaSnapshot::new();
        for record in self.list() {
            replay(&mut snapshot, &record?)?;
        }
        Ok(snapshot)
    }

    /// Rebuild the schema as it was right after `order_key` was applied.
    pub fn snapshot_at(&self, order_key: u64) -> Result<SchemaSnapshot, MigrationError> {
        let mut snapshot = SchemaSnapshot::new();
        for record in self.list() {
            let record = record?;
            if record.order_key > order_key {
                break;
            }
            replay(&mut snapshot, &record)?;
        }
        Ok(snapshot)
    }

    /// Flush changes to disk.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.tree.flush()?;
        Ok(())
    }
}

/// Apply a record's up operations to a snapshot.
pub(crate) fn replay(
    snapshot: &mut SchemaSnapshot,
    record: &HistoryRecord,
) -> Result<(), MigrationError> {
    for op in &record.up {
        op.apply_to(snapshot)
            .map_err(|e| MigrationError::StateCorrupted {
                message: format!("replaying {} ({}): {e}", record.id(), op.describe()),
            })?;
    }
    Ok(())
}

/// Iterator over history records in application order.
pub struct HistoryIter {
    inner: sled::Iter,
}

impl Iterator for HistoryIter {
    type Item = Result<HistoryRecord, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| {
            let (_, value) = entry?;
            HistoryRecord::from_bytes(&value)
        })
    }
}

impl DoubleEndedIterator for HistoryIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|entry| {
            let (_, value) = entry?;
            HistoryRecord::from_bytes(&value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, TableDef};
    use crate::migration::{Migration, MigrationId, Operation};

    fn record(order_key: u64, name: &str, table: &str) -> HistoryRecord {
        let table = TableDef::new(table)
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_primary_key(["Id"]);
        let migration = Migration::new(
            MigrationId::new(order_key, name).unwrap(),
            vec![Operation::CreateTable {
                table: table.clone(),
            }],
            vec![Operation::DropTable { table }],
            Vec::new(),
        )
        .unwrap();
        HistoryRecord::for_migration(&migration)
    }

    fn open_store() -> (tempfile::TempDir, HistoryStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = HistoryStore::open(&db).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_append_and_list() {
        let (_dir, store) = open_store();

        store.append(&record(1, "Users", "Users")).unwrap();
        store.append(&record(2, "Orders", "Orders")).unwrap();

        let names: Vec<String> = store.list().map(|r| r.unwrap().name).collect();
        assert_eq!(names, vec!["Users", "Orders"]);
        assert_eq!(store.len(), 2);

        // list restarts from the beginning every time
        assert_eq!(store.list().count(), 2);
        assert_eq!(store.list().next_back().unwrap().unwrap().name, "Orders");
    }

    #[test]
    fn test_append_out_of_order() {
        let (_dir, store) = open_store();

        store.append(&record(5, "Second", "A")).unwrap();
        let err = store.append(&record(5, "Again", "B")).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Order {
                order_key: 5,
                last_key: 5
            }
        ));
        assert!(store.append(&record(3, "Earlier", "B")).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_last() {
        let (_dir, store) = open_store();

        assert!(matches!(
            store.remove_last(),
            Err(MigrationError::EmptyHistory)
        ));

        store.append(&record(1, "Users", "Users")).unwrap();
        store.append(&record(2, "Orders", "Orders")).unwrap();

        assert_eq!(store.remove_last().unwrap().name, "Orders");
        assert_eq!(store.last().unwrap().unwrap().name, "Users");
    }

    #[test]
    fn test_get_by_name() {
        let (_dir, store) = open_store();
        store.append(&record(7, "Users", "Users")).unwrap();

        assert!(store.get("Users").unwrap().is_some());
        assert!(store.get("7_Users").unwrap().is_some());
        assert!(store.get("Orders").unwrap().is_none());
        assert!(store.get_by_key(7).unwrap().is_some());
    }

    #[test]
    fn test_latest_applied_snapshot() {
        let (_dir, store) = open_store();
        store.append(&record(1, "Users", "Users")).unwrap();
        store.append(&record(2, "Orders", "Orders")).unwrap();

        let snapshot = store.latest_applied_snapshot().unwrap();
        assert_eq!(snapshot.table_names(), vec!["Orders", "Users"]);

        let earlier = store.snapshot_at(1).unwrap();
        assert_eq!(earlier.table_names(), vec!["Users"]);
    }

    #[test]
    fn test_corrupt_history_is_reported() {
        let (_dir, store) = open_store();
        store.append(&record(1, "Users", "Users")).unwrap();
        store.append(&record(2, "UsersAgain", "Users")).unwrap();

        let err = store.latest_applied_snapshot().unwrap_err();
        assert!(matches!(err, MigrationError::StateCorrupted { .. }));
    }
}
