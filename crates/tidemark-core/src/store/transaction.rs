//! Store transactions: schema operations applied atomically with their
//! data effects and the matching history change.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::engine::{encode_row, row_key, Row, SledStore};
use crate::catalog::{ConstraintDef, SchemaSnapshot};
use crate::error::Error;
use crate::migration::{HistoryRecord, HistoryStore, Operation};
use serde_json::Value;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use tracing::{trace, warn};

/// History change committed together with a transaction.
#[derive(Debug, Clone)]
pub enum HistoryChange {
    /// Leave the history alone.
    None,
    /// Append a record (a migration was applied).
    Append(HistoryRecord),
    /// Remove the record with this order key (a migration was reverted).
    RemoveLast(u64),
}

/// Rows of one table as seen inside a transaction.
#[derive(Debug, Default)]
struct TableRows {
    /// Name the rows are stored under, if they came from the store.
    stored_as: Option<String>,
    rows: Vec<Row>,
}

/// A transaction over the store.
///
/// Operations are checked and applied to a working copy of the catalog and
/// of the rows they touch; nothing reaches the store until [`commit`].
/// Dropping the transaction without committing discards everything.
///
/// [`commit`]: StoreTransaction::commit
pub struct StoreTransaction<'a> {
    store: &'a SledStore,
    /// Catalog as it was when the transaction began.
    original: SchemaSnapshot,
    /// Working catalog.
    snapshot: SchemaSnapshot,
    /// Rows of the tables touched so far, keyed by current table name.
    tables: BTreeMap<String, TableRows>,
    /// Stored tables whose rows must be removed on commit.
    wiped: BTreeSet<String>,
    executed: usize,
}

impl<'a> StoreTransaction<'a> {
    /// Create a new transaction.
    pub(crate) fn new(store: &'a SledStore) -> Result<Self, Error> {
        let snapshot = store.snapshot()?;
        Ok(Self {
            store,
            original: snapshot.clone(),
            snapshot,
            tables: BTreeMap::new(),
            wiped: BTreeSet::new(),
            executed: 0,
        })
    }

    /// The catalog including the operations executed so far.
    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }

    /// Number of operations executed so far.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Execute one operation.
    ///
    /// On error the working state is unchanged for schema failures; data
    /// failures may leave partially rewritten rows, so the caller is expected
    /// to roll back.
    pub fn execute(&mut self, op: &Operation) -> Result<(), Error> {
        if let Operation::Irreversible { reason } = op {
            warn!(reason = %reason, "irreversible step skipped; prior state not restored");
            self.executed += 1;
            return Ok(());
        }

        let mut next = self.snapshot.clone();
        op.apply_to(&mut next)?;
        self.apply_data(op)?;
        self.snapshot = next;
        self.executed += 1;
        trace!(operation = %op.describe(), "operation executed");
        Ok(())
    }

    fn apply_data(&mut self, op: &Operation) -> Result<(), Error> {
        match op {
            Operation::CreateTable { table } => {
                self.tables.insert(table.name.clone(), TableRows::default());
            }

            Operation::DropTable { table } => {
                self.load(&table.name)?;
                if let Some(dropped) = self.tables.remove(&table.name) {
                    self.wiped.extend(dropped.stored_as);
                }
            }

            Operation::AddColumn { table, column } => {
                let value = column.default.as_ref().map_or(Value::Null, |d| d.to_json());
                let rows = self.load(table)?;
                if value.is_null() && !column.nullable && !rows.rows.is_empty() {
                    return Err(Error::Rejected(format!(
                        "cannot add required column '{table}.{}' without a default: the table holds {} rows",
                        column.name,
                        rows.rows.len()
                    )));
                }
                if !column.column_type.accepts(&value) {
                    return Err(Error::Rejected(format!(
                        "default {value} does not fit '{table}.{}' ({})",
                        column.name, column.column_type
                    )));
                }
                for row in &mut rows.rows {
                    row.insert(column.name.clone(), value.clone());
                }
            }

            Operation::DropColumn { table, column } => {
                for row in &mut self.load(table)?.rows {
                    row.remove(&column.name);
                }
            }

            Operation::AlterColumn { table, to, .. } => {
                for row in &self.load(table)?.rows {
                    let value = row.get(&to.name).unwrap_or(&Value::Null);
                    if value.is_null() {
                        if !to.nullable {
                            return Err(Error::Rejected(format!(
                                "column '{table}.{}' holds null values",
                                to.name
                            )));
                        }
                    } else if !to.column_type.accepts(value) {
                        return Err(Error::Rejected(format!(
                            "value {value} in '{table}.{}' does not fit {}",
                            to.name, to.column_type
                        )));
                    }
                }
            }

            Operation::AlterPrimaryKey { table, to, .. } => {
                let rows = self.load(table)?;
                if has_duplicates(&rows.rows, to, false) {
                    return Err(Error::Rejected(format!(
                        "rows of '{table}' are not unique on ({})",
                        to.join(", ")
                    )));
                }
            }

            Operation::RenameTable { from, to } => {
                self.load(from)?;
                if let Some(rows) = self.tables.remove(from) {
                    self.tables.insert(to.clone(), rows);
                }
            }

            Operation::RenameColumn { table, from, to } => {
                for row in &mut self.load(table)?.rows {
                    if let Some(value) = row.remove(from) {
                        row.insert(to.clone(), value);
                    }
                }
            }

            Operation::AddConstraint { constraint } => self.check_constraint(constraint)?,

            Operation::DropConstraint { .. } | Operation::Irreversible { .. } => {}
        }

        Ok(())
    }

    /// Check existing rows against a new constraint.
    ///
    /// Check expressions are recorded but not evaluated.
    fn check_constraint(&mut self, constraint: &ConstraintDef) -> Result<(), Error> {
        match constraint {
            ConstraintDef::Unique {
                name,
                table,
                columns,
            } => {
                if has_duplicates(&self.load(table)?.rows, columns, true) {
                    return Err(Error::Rejected(format!(
                        "rows of '{table}' violate unique constraint '{name}'"
                    )));
                }
            }
            ConstraintDef::ForeignKey {
                name,
                table,
                columns,
                references_table,
                references_columns,
                ..
            } => {
                let targets: HashSet<String> = self
                    .load(references_table)?
                    .rows
                    .iter()
                    .map(|row| tuple_key(&tuple(row, references_columns)))
                    .collect();
                let dangling = self.load(table)?.rows.iter().any(|row| {
                    let values = tuple(row, columns);
                    !values.iter().any(Value::is_null) && !targets.contains(&tuple_key(&values))
                });
                if dangling {
                    return Err(Error::Rejected(format!(
                        "rows of '{table}' violate foreign key '{name}'"
                    )));
                }
            }
            ConstraintDef::Check { .. } => {}
        }
        Ok(())
    }

    /// Rows of a table, loading them from the store on first use.
    fn load(&mut self, table: &str) -> Result<&mut TableRows, Error> {
        if !self.tables.contains_key(table) {
            let rows = self.store.rows(table)?;
            self.tables.insert(
                table.to_string(),
                TableRows {
                    stored_as: Some(table.to_string()),
                    rows,
                },
            );
        }
        self.tables
            .get_mut(table)
            .ok_or_else(|| Error::Transaction(format!("rows of '{table}' not loaded")))
    }

    /// Commit the transaction atomically.
    ///
    /// The catalog, the rewritten rows and the history change are written
    /// in one sled transaction: all of them land or none do.
    pub fn commit(self, change: HistoryChange) -> Result<(), Error> {
        // Catalog writes: every table of the working snapshot, minus the ones that went away.
        let mut catalog_puts = Vec::new();
        for table in self.snapshot.tables.values() {
            if self.original.table(&table.name) != Some(table) {
                catalog_puts.push((table.name.clone(), table.to_bytes()?));
            }
        }
        let catalog_removes: Vec<String> = self
            .original
            .tables
            .keys()
            .filter(|name| !self.snapshot.contains(name))
            .cloned()
            .collect();

        // Row writes: clear every touched table as stored, then write it back under its current name.
        let mut row_removes = Vec::new();
        let stored = self
            .tables
            .values()
            .filter_map(|t| t.stored_as.as_deref())
            .chain(self.wiped.iter().map(String::as_str));
        for name in stored {
            row_removes.extend(self.store.row_keys(name)?);
        }
        let mut row_puts = Vec::new();
        for (name, table_rows) in &self.tables {
            let primary_key = self
                .snapshot
                .table(name)
                .map(|t| t.primary_key.clone())
                .unwrap_or_default();
            for row in &table_rows.rows {
                row_puts.push((row_key(name, &primary_key, row)?, encode_row(row)?));
            }
        }

        let history_put = match &change {
            HistoryChange::Append(record) => Some((
                HistoryStore::key(record.order_key),
                record
                    .to_bytes()
                    .map_err(|e| Error::Serialization(e.to_string()))?,
            )),
            _ => None,
        };

        let catalog_tree = self.store.catalog_tree();
        let rows_tree = self.store.rows_tree();
        let history_tree = self.store.history().tree();

        let result: Result<(), TransactionError<Error>> = (catalog_tree, rows_tree, history_tree)
            .transaction(|(catalog_tx, rows_tx, history_tx)| {
                for name in &catalog_removes {
                    catalog_tx.remove(name.as_bytes())?;
                }
                for (name, bytes) in &catalog_puts {
                    catalog_tx.insert(name.as_bytes(), bytes.as_slice())?;
                }
                for key in &row_removes {
                    rows_tx.remove(key.clone())?;
                }
                for (key, value) in &row_puts {
                    rows_tx.insert(key.as_slice(), value.as_slice())?;
                }
                match (&change, &history_put) {
                    (HistoryChange::Append(_), Some((key, bytes))) => {
                        history_tx.insert(&key[..], bytes.as_slice())?;
                    }
                    (HistoryChange::RemoveLast(order_key), _) => {
                        if history_tx.remove(&HistoryStore::key(*order_key)[..])?.is_none() {
                            return Err(ConflictableTransactionError::Abort(Error::Transaction(
                                format!("history has no record with order key {order_key}"),
                            )));
                        }
                    }
                    _ => {}
                }
                Ok(())
            });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e)),
        }
    }

    /// Rollback the transaction (discard all pending changes).
    pub fn rollback(self) {
        trace!(executed = self.executed, "transaction rolled back");
        drop(self.tables);
    }
}

/// Values of `columns` in `row`, null for missing ones.
fn tuple(row: &Row, columns: &[String]) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Comparable encoding of a value tuple.
fn tuple_key(values: &[Value]) -> String {
    Value::Array(values.to_vec()).to_string()
}

/// Whether two rows share the same values on `columns`.
///
/// With `skip_nulls`, tuples containing a null never collide.
fn has_duplicates(rows: &[Row], columns: &[String], skip_nulls: bool) -> bool {
    let mut seen = HashSet::new();
    for row in rows {
        let values = tuple(row, columns);
        if skip_nulls && values.iter().any(Value::is_null) {
            continue;
        }
        if !seen.insert(tuple_key(&values)) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, DefaultValue, SchemaError, TableDef};
    use crate::migration::{Migration, MigrationId};
    use crate::store::StoreConfig;
    use serde_json::json;

    fn users() -> TableDef {
        TableDef::new("Users")
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_column(ColumnDef::nullable("Email", ColumnType::Varchar(20)))
            .with_primary_key(["Id"])
    }

    fn populated_store() -> SledStore {
        let store = SledStore::open(StoreConfig::temporary()).unwrap();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::CreateTable { table: users() }).unwrap();
        tx.commit(HistoryChange::None).unwrap();
        store
            .insert_row("Users", json!({"Id": 1, "Email": "a@example.com"}))
            .unwrap();
        store.insert_row("Users", json!({"Id": 2})).unwrap();
        store
    }

    #[test]
    fn test_uncommitted_changes_are_invisible() {
        let store = populated_store();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::DropColumn {
            table: "Users".into(),
            column: ColumnDef::nullable("Email", ColumnType::Varchar(20)),
        })
        .unwrap();
        assert!(!tx.snapshot().table("Users").unwrap().has_column("Email"));
        tx.rollback();

        assert!(store.snapshot().unwrap().table("Users").unwrap().has_column("Email"));
        assert_eq!(store.rows("Users").unwrap()[0]["Email"], json!("a@example.com"));
    }

    #[test]
    fn test_add_required_column_to_populated_table() {
        let store = populated_store();
        let mut tx = store.begin().unwrap();

        let err = tx
            .execute(&Operation::AddColumn {
                table: "Users".into(),
                column: ColumnDef::new("Age", ColumnType::Int),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));

        // with a default the rows are backfilled
        tx.execute(&Operation::AddColumn {
            table: "Users".into(),
            column: ColumnDef::new("Age", ColumnType::Int).with_default(DefaultValue::Int(18)),
        })
        .unwrap();
        tx.commit(HistoryChange::None).unwrap();

        let rows = store.rows("Users").unwrap();
        assert!(rows.iter().all(|r| r["Age"] == json!(18)));
    }

    #[test]
    fn test_narrowing_that_truncates_is_rejected() {
        let store = populated_store();
        let mut tx = store.begin().unwrap();
        let err = tx
            .execute(&Operation::AlterColumn {
                table: "Users".into(),
                from: ColumnDef::nullable("Email", ColumnType::Varchar(20)),
                to: ColumnDef::nullable("Email", ColumnType::Varchar(5)),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));

        let err = tx
            .execute(&Operation::AlterColumn {
                table: "Users".into(),
                from: ColumnDef::nullable("Email", ColumnType::Varchar(20)),
                to: ColumnDef::new("Email", ColumnType::Varchar(20)),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }

    #[test]
    fn test_schema_errors_leave_working_state() {
        let store = populated_store();
        let mut tx = store.begin().unwrap();
        let err = tx
            .execute(&Operation::CreateTable { table: users() })
            .unwrap_err();
        assert!(matches!(err, Error::Schema(SchemaError::TableExists { .. })));
        assert_eq!(tx.executed(), 0);
    }

    #[test]
    fn test_rename_table_moves_rows() {
        let store = populated_store();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::RenameTable {
            from: "Users".into(),
            to: "Accounts".into(),
        })
        .unwrap();
        tx.execute(&Operation::RenameColumn {
            table: "Accounts".into(),
            from: "Email".into(),
            to: "Mail".into(),
        })
        .unwrap();
        tx.commit(HistoryChange::None).unwrap();

        assert_eq!(store.row_count("Users").unwrap(), 0);
        let rows = store.rows("Accounts").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Mail"], json!("a@example.com"));
        assert!(store.table("Users").unwrap().is_none());
    }

    #[test]
    fn test_drop_table_removes_rows() {
        let store = populated_store();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::DropTable { table: users() }).unwrap();
        tx.commit(HistoryChange::None).unwrap();

        assert_eq!(store.row_count("Users").unwrap(), 0);
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_constraints_checked_against_rows() {
        let store = populated_store();
        store.insert_row("Users", json!({"Id": 3, "Email": "a@example.com"})).unwrap();

        let mut tx = store.begin().unwrap();
        let err = tx
            .execute(&Operation::AddConstraint {
                constraint: ConstraintDef::unique("uq_users_email", "Users", "Email"),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
    }

    #[test]
    fn test_irreversible_marker_is_a_no_op() {
        let store = populated_store();
        let before = store.snapshot().unwrap();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::Irreversible {
            reason: "dropped data".into(),
        })
        .unwrap();
        assert_eq!(tx.executed(), 1);
        assert_eq!(tx.snapshot(), &before);
        tx.commit(HistoryChange::None).unwrap();

        assert_eq!(store.snapshot().unwrap(), before);
        assert_eq!(store.row_count("Users").unwrap(), 2);
    }

    #[test]
    fn test_commit_with_history_change() {
        let store = SledStore::open(StoreConfig::temporary()).unwrap();
        let migration = Migration::new(
            MigrationId::new(1, "Init").unwrap(),
            vec![Operation::CreateTable { table: users() }],
            vec![Operation::DropTable { table: users() }],
            Vec::new(),
        )
        .unwrap();

        let mut tx = store.begin().unwrap();
        tx.execute(&migration.up[0]).unwrap();
        tx.commit(HistoryChange::Append(HistoryRecord::for_migration(&migration)))
            .unwrap();
        assert_eq!(store.history().len(), 1);

        let mut tx = store.begin().unwrap();
        tx.execute(&migration.down[0]).unwrap();
        tx.commit(HistoryChange::RemoveLast(1)).unwrap();
        assert!(store.history().is_empty());
        assert!(store.snapshot().unwrap().is_empty());

        // removing a record that is not there aborts the whole commit
        let mut tx = store.begin().unwrap();
        tx.execute(&migration.up[0]).unwrap();
        assert!(tx.commit(HistoryChange::RemoveLast(1)).is_err());
        assert!(store.snapshot().unwrap().is_empty());
    }
}
