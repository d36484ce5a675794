//! Store engine: an embedded relational target for migrations.
//!
//! The store keeps its own catalog of table definitions and the rows those
//! tables hold, so that schema operations are checked against real data
//! (adding a required column to a populated table, narrowing a column whose
//! values no longer fit, and so on).

use super::transaction::StoreTransaction;
use super::StoreConfig;
use crate::catalog::{SchemaError, SchemaSnapshot, TableDef};
use crate::error::Error;
use crate::migration::HistoryStore;
use serde_json::{Map, Value};
use sled::{Db, Tree};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Tree name for table definitions.
const CATALOG_TREE: &str = "tidemark:catalog";

/// Tree name for table rows.
const ROWS_TREE: &str = "tidemark:rows";

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// A row: column name to JSON value.
pub type Row = Map<String, Value>;

/// The store migrations run against.
pub struct SledStore {
    id: String,
    db: Db,
    catalog_tree: Tree,
    rows_tree: Tree,
    history: HistoryStore,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let catalog_tree = db.open_tree(CATALOG_TREE)?;
        let rows_tree = db.open_tree(ROWS_TREE)?;
        let history = HistoryStore::from_tree(db.open_tree(HistoryStore::TREE_NAME)?);

        let id = if config.temporary {
            format!("memory:{}", NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed))
        } else {
            config
                .path
                .canonicalize()
                .unwrap_or_else(|_| config.path.clone())
                .display()
                .to_string()
        };
        debug!(store = %id, recovered = db.was_recovered(), "store opened");

        Ok(Self {
            id,
            db,
            catalog_tree,
            rows_tree,
            history,
        })
    }

    /// Identity of this store, used to key the advisory lock.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The migration history kept alongside the data.
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// The schema as the store's catalog currently records it.
    pub fn snapshot(&self) -> Result<SchemaSnapshot, Error> {
        let mut snapshot = SchemaSnapshot::new();
        for entry in self.catalog_tree.iter() {
            let (_, value) = entry?;
            let table = TableDef::from_bytes(&value)?;
            snapshot.tables.insert(table.name.clone(), table);
        }
        Ok(snapshot)
    }

    /// Get a table definition from the catalog.
    pub fn table(&self, name: &str) -> Result<Option<TableDef>, Error> {
        match self.catalog_tree.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(TableDef::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert a row into a table.
    ///
    /// Missing columns take their default (or null). Fails when the table or
    /// a column is unknown, a required column is null, a value does not fit
    /// its column type, or the primary key is already taken.
    pub fn insert_row(&self, table: &str, values: Value) -> Result<(), Error> {
        let def = self
            .table(table)?
            .ok_or_else(|| SchemaError::UnknownTable {
                table: table.to_string(),
            })?;
        let Value::Object(values) = values else {
            return Err(Error::InvalidData(format!(
                "row for '{table}' must be a JSON object"
            )));
        };

        for name in values.keys() {
            if !def.has_column(name) {
                return Err(SchemaError::UnknownColumn {
                    table: table.to_string(),
                    column: name.clone(),
                }
                .into());
            }
        }

        let mut row = Row::new();
        for column in def.columns.values() {
            let value = match values.get(&column.name) {
                Some(value) => value.clone(),
                None => column.default.as_ref().map_or(Value::Null, |d| d.to_json()),
            };
            if value.is_null() {
                if !column.nullable {
                    return Err(Error::Rejected(format!(
                        "column '{table}.{}' does not accept null",
                        column.name
                    )));
                }
            } else if !column.column_type.accepts(&value) {
                return Err(Error::Rejected(format!(
                    "value {value} does not fit '{table}.{}' ({})",
                    column.name, column.column_type
                )));
            }
            row.insert(column.name.clone(), value);
        }

        let key = row_key(table, &def.primary_key, &row)?;
        if self.rows_tree.contains_key(&key)? {
            return Err(Error::Rejected(format!(
                "duplicate primary key in '{table}'"
            )));
        }
        self.rows_tree.insert(key, encode_row(&row)?)?;
        Ok(())
    }

    /// All rows of a table, ordered by primary key encoding.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, Error> {
        self.rows_tree
            .scan_prefix(table_prefix(table))
            .map(|entry| {
                let (_, value) = entry?;
                decode_row(&value)
            })
            .collect()
    }

    /// Number of rows a table holds.
    pub fn row_count(&self, table: &str) -> Result<usize, Error> {
        let mut count = 0;
        for entry in self.rows_tree.scan_prefix(table_prefix(table)) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Names of the catalog tables that hold at least one row.
    pub fn populated_tables(&self) -> Result<BTreeSet<String>, Error> {
        let mut populated = BTreeSet::new();
        for entry in self.catalog_tree.iter() {
            let (key, _) = entry?;
            let name = String::from_utf8_lossy(&key).into_owned();
            if self
                .rows_tree
                .scan_prefix(table_prefix(&name))
                .next()
                .transpose()?
                .is_some()
            {
                populated.insert(name);
            }
        }
        Ok(populated)
    }

    /// Begin a transaction over the catalog, the rows and the history.
    pub fn begin(&self) -> Result<StoreTransaction<'_>, Error> {
        StoreTransaction::new(self)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn catalog_tree(&self) -> &Tree {
        &self.catalog_tree
    }

    pub(crate) fn rows_tree(&self) -> &Tree {
        &self.rows_tree
    }

    /// Keys of every stored row of `table`.
    pub(crate) fn row_keys(&self, table: &str) -> Result<Vec<sled::IVec>, Error> {
        self.rows_tree
            .scan_prefix(table_prefix(table))
            .map(|entry| entry.map(|(key, _)| key).map_err(Error::from))
            .collect()
    }
}

/// Prefix shared by every row key of a table.
pub(crate) fn table_prefix(table: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(table.len() + 1);
    prefix.extend_from_slice(table.as_bytes());
    prefix.push(0); // Null separator
    prefix
}

/// Row key: table prefix followed by the JSON encoded primary key values.
pub(crate) fn row_key(table: &str, primary_key: &[String], row: &Row) -> Result<Vec<u8>, Error> {
    let values: Vec<&Value> = primary_key
        .iter()
        .map(|c| row.get(c).unwrap_or(&Value::Null))
        .collect();
    let encoded =
        serde_json::to_vec(&values).map_err(|e| Error::Serialization(e.to_string()))?;
    let mut key = table_prefix(table);
    key.extend_from_slice(&encoded);
    Ok(key)
}

pub(crate) fn encode_row(row: &Row) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(row).map_err(|e| Error::Serialization(e.to_string()))
}

pub(crate) fn decode_row(bytes: &[u8]) -> Result<Row, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, DefaultValue};
    use crate::migration::Operation;
    use crate::store::HistoryChange;
    use serde_json::json;

    fn users() -> TableDef {
        TableDef::new("Users")
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_column(ColumnDef::new("Name", ColumnType::Varchar(10)))
            .with_column(
                ColumnDef::new("Active", ColumnType::Bool).with_default(DefaultValue::Bool(true)),
            )
            .with_primary_key(["Id"])
    }

    fn store_with_users() -> SledStore {
        let store = SledStore::open(StoreConfig::temporary()).unwrap();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::CreateTable { table: users() }).unwrap();
        tx.commit(HistoryChange::None).unwrap();
        store
    }

    #[test]
    fn test_open_temporary() {
        let a = SledStore::open(StoreConfig::temporary()).unwrap();
        let b = SledStore::open(StoreConfig::temporary()).unwrap();
        assert!(a.id().starts_with("memory:"));
        assert_ne!(a.id(), b.id());
        assert!(a.snapshot().unwrap().is_empty());
        assert!(a.history().is_empty());
    }

    #[test]
    fn test_insert_row_fills_defaults() {
        let store = store_with_users();
        store
            .insert_row("Users", json!({"Id": 1, "Name": "ada"}))
            .unwrap();

        let rows = store.rows("Users").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Active"], json!(true));
        assert_eq!(store.row_count("Users").unwrap(), 1);
        assert!(store.populated_tables().unwrap().contains("Users"));
    }

    #[test]
    fn test_insert_row_rejections() {
        let store = store_with_users();

        assert!(matches!(
            store.insert_row("Nope", json!({"Id": 1})),
            Err(Error::Schema(SchemaError::UnknownTable { .. }))
        ));
        assert!(matches!(
            store.insert_row("Users", json!({"Id": 1})),
            Err(Error::Rejected(_))
        ));
        assert!(matches!(
            store.insert_row("Users", json!({"Id": 1, "Name": "much too long for ten"})),
            Err(Error::Rejected(_))
        ));
        assert!(matches!(
            store.insert_row("Users", json!({"Id": 1, "Name": "a", "Extra": 1})),
            Err(Error::Schema(SchemaError::UnknownColumn { .. }))
        ));

        store.insert_row("Users", json!({"Id": 1, "Name": "a"})).unwrap();
        assert!(matches!(
            store.insert_row("Users", json!({"Id": 1, "Name": "b"})),
            Err(Error::Rejected(_))
        ));
    }

    #[test]
    fn test_row_prefixes_do_not_overlap() {
        let store = store_with_users();
        let mut tx = store.begin().unwrap();
        tx.execute(&Operation::CreateTable {
            table: TableDef::new("UsersArchive")
                .with_column(ColumnDef::new("Id", ColumnType::Int))
                .with_primary_key(["Id"]),
        })
        .unwrap();
        tx.commit(HistoryChange::None).unwrap();

        store.insert_row("UsersArchive", json!({"Id": 1})).unwrap();
        assert_eq!(store.row_count("Users").unwrap(), 0);
        assert_eq!(store.row_count("UsersArchive").unwrap(), 1);
    }
}
