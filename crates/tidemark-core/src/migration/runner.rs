//! Migration runner - applies and reverts migrations against a store.
//!
//! Every migration runs in its own store transaction under the store's
//! advisory lock. A failing operation, a cancellation or an expired
//! transaction deadline rolls the transaction back before the error is
//! returned, so a migration is either fully applied (and recorded) or not at
//! all.

use super::error::MigrationError;
use super::model::{HistoryRecord, Migration, MigrationId};
use super::operation::Operation;
use super::set::MigrationSet;
use crate::lock::{AdvisoryLock, LockGuard};
use crate::store::{HistoryChange, SledStore};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How long to wait for the advisory lock.
    pub lock_timeout: Duration,
    /// Upper bound on one migration's transaction. None means unbounded.
    pub transaction_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            transaction_timeout: None,
        }
    }
}

impl RunnerConfig {
    /// Set the lock timeout.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the transaction timeout.
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }
}

/// Shared cancellation flag.
///
/// Checked before every operation and before commit; a cancelled run rolls
/// back and fails with [`MigrationError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Where `apply_up_to` should leave the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Before the first migration (everything reverted).
    Initial,
    /// Right after the named migration.
    Migration(String),
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s == "0" {
            Target::Initial
        } else {
            Target::Migration(s.to_string())
        })
    }
}

/// What a run did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    /// Migrations applied, in order.
    pub applied: Vec<MigrationId>,
    /// Migrations reverted, in order.
    pub reverted: Vec<MigrationId>,
}

impl RunReport {
    /// Check whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.reverted.is_empty()
    }
}

/// Called after each operation executes, before commit.
pub type ProgressFn = dyn Fn(&StepProgress<'_>) + Send + Sync;

/// One executed operation of an in-flight migration.
#[derive(Debug)]
pub struct StepProgress<'a> {
    /// Migration being applied or reverted.
    pub migration: &'a MigrationId,
    /// Zero-based index of the operation.
    pub index: usize,
    /// Number of operations in this run.
    pub total: usize,
    /// The operation just executed.
    pub operation: &'a Operation,
}

/// Applies and reverts migrations.
pub struct MigrationRunner {
    config: RunnerConfig,
    cancel: CancelFlag,
    progress: Option<Arc<ProgressFn>>,
}

impl MigrationRunner {
    /// Create a new runner.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::default(),
            progress: None,
        }
    }

    /// Report each executed operation to `progress`.
    pub fn with_progress(
        mut self,
        progress: impl Fn(&StepProgress<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Use an externally owned cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The flag that cancels this runner's in-flight work.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Apply one migration and record it in the history.
    pub fn apply(
        &self,
        migration: &Migration,
        store: &SledStore,
    ) -> Result<HistoryRecord, MigrationError> {
        let _lock = self.lock(store)?;
        self.apply_locked(migration, store)
    }

    /// Revert the most recently applied migration and drop its record.
    pub fn revert(&self, store: &SledStore) -> Result<HistoryRecord, MigrationError> {
        let _lock = self.lock(store)?;
        self.revert_locked(store)
    }

    /// Apply every pending migration in order.
    ///
    /// Stops at the first failure; migrations applied before it stay applied.
    pub fn apply_pending(
        &self,
        set: &MigrationSet,
        store: &SledStore,
    ) -> Result<RunReport, MigrationError> {
        let _lock = self.lock(store)?;
        let mut report = RunReport::default();
        for migration in set.pending(store.history())? {
            self.apply_locked(migration, store)?;
            report.applied.push(migration.id.clone());
        }
        Ok(report)
    }

    /// Apply or revert migrations until the store is at `target`.
    ///
    /// A target already in the history reverts everything after it. A pending
    /// target applies every pending migration up to and including it. Any
    /// other name fails with [`MigrationError::NotFound`].
    pub fn apply_up_to(
        &self,
        target: &Target,
        set: &MigrationSet,
        store: &SledStore,
    ) -> Result<RunReport, MigrationError> {
        let _lock = self.lock(store)?;
        let history = store.history();
        let mut report = RunReport::default();

        let keep_through = match target {
            Target::Initial => None,
            Target::Migration(name) => match history.get(name)? {
                Some(record) => Some(record.order_key),
                None => return self.apply_through(name, set, store),
            },
        };

        while let Some(last) = history.last()? {
            if keep_through.is_some_and(|key| last.order_key <= key) {
                break;
            }
            report.reverted.push(self.revert_locked(store)?.id());
        }
        Ok(report)
    }

    /// Apply pending migrations up to and including `name`. Lock must be held.
    fn apply_through(
        &self,
        name: &str,
        set: &MigrationSet,
        store: &SledStore,
    ) -> Result<RunReport, MigrationError> {
        let wanted = set.find(name).ok_or_else(|| MigrationError::NotFound {
            name: name.to_string(),
        })?;

        let mut report = RunReport::default();
        for migration in set.pending(store.history())? {
            if migration.id.order_key > wanted.id.order_key {
                break;
            }
            self.apply_locked(migration, store)?;
            report.applied.push(migration.id.clone());
        }
        Ok(report)
    }

    fn lock(&self, store: &SledStore) -> Result<LockGuard, MigrationError> {
        AdvisoryLock::acquire(store.id(), self.config.lock_timeout)
    }

    fn apply_locked(
        &self,
        migration: &Migration,
        store: &SledStore,
    ) -> Result<HistoryRecord, MigrationError> {
        migration.verify_checksum()?;

        let history = store.history();
        if history.get_by_key(migration.id.order_key)?.is_some() {
            return Err(MigrationError::Conflict {
                message: format!("{} is already applied", migration.id),
            });
        }
        history.check_append(migration.id.order_key)?;

        let record = HistoryRecord::for_migration(migration);
        self.run(
            &migration.id,
            &migration.up,
            store,
            HistoryChange::Append(record.clone()),
        )?;

        info!(
            migration = %migration.id,
            operations = migration.up.len(),
            "migration applied"
        );
        Ok(record)
    }

    fn revert_locked(&self, store: &SledStore) -> Result<HistoryRecord, MigrationError> {
        let record = store
            .history()
            .last()?
            .ok_or(MigrationError::EmptyHistory)?;

        self.run(
            &record.id(),
            &record.down,
            store,
            HistoryChange::RemoveLast(record.order_key),
        )?;

        info!(
            migration = %record.id(),
            operations = record.down.len(),
            "migration reverted"
        );
        Ok(record)
    }

    /// Execute `ops` in one transaction and commit them with `change`.
    fn run(
        &self,
        id: &MigrationId,
        ops: &[Operation],
        store: &SledStore,
        change: HistoryChange,
    ) -> Result<(), MigrationError> {
        let started = Instant::now();
        let mut tx = store.begin()?;

        for (index, op) in ops.iter().enumerate() {
            if let Some(e) = self.interrupted(id, started) {
                tx.rollback();
                warn!(migration = %id, error = %e, "rolled back");
                return Err(e);
            }

            debug!(migration = %id, step = index + 1, operation = %op.describe(), "executing");
            if let Err(e) = tx.execute(op) {
                tx.rollback();
                warn!(migration = %id, step = index + 1, error = %e, "operation failed, rolled back");
                return Err(MigrationError::Execution {
                    migration: id.to_string(),
                    index: Some(index),
                    operation: op.describe(),
                    reason: e.to_string(),
                });
            }

            if let Some(progress) = &self.progress {
                progress(&StepProgress {
                    migration: id,
                    index,
                    total: ops.len(),
                    operation: op,
                });
            }
        }

        if let Some(e) = self.interrupted(id, started) {
            tx.rollback();
            warn!(migration = %id, error = %e, "rolled back");
            return Err(e);
        }

        tx.commit(change).map_err(|e| MigrationError::Execution {
            migration: id.to_string(),
            index: None,
            operation: String::new(),
            reason: e.to_string(),
        })
    }

    /// Cancellation or deadline error, if the run must stop.
    fn interrupted(&self, id: &MigrationId, started: Instant) -> Option<MigrationError> {
        if self.cancel.is_cancelled() {
            return Some(MigrationError::Cancelled {
                migration: id.to_string(),
            });
        }
        match self.config.transaction_timeout {
            Some(limit) if started.elapsed() > limit => Some(MigrationError::Execution {
                migration: id.to_string(),
                index: None,
                operation: String::new(),
                reason: format!("transaction exceeded its {limit:?} timeout"),
            }),
            _ => None,
        }
    }
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ColumnType, TableDef};
    use crate::migration::{ErrorKind, GeneratorOptions, ScriptGenerator};
    use crate::store::StoreConfig;

    fn create(order_key: u64, table: &str) -> Migration {
        let def = TableDef::new(table)
            .with_column(ColumnDef::new("Id", ColumnType::Int))
            .with_primary_key(["Id"]);
        ScriptGenerator::generate(
            MigrationId::new(order_key, format!("Create{table}")).unwrap(),
            vec![Operation::CreateTable { table: def }],
            &GeneratorOptions::default(),
        )
        .unwrap()
    }

    fn store() -> SledStore {
        SledStore::open(StoreConfig::temporary()).unwrap()
    }

    #[test]
    fn test_target_parse() {
        assert_eq!("0".parse::<Target>().unwrap(), Target::Initial);
        assert_eq!(
            "Init".parse::<Target>().unwrap(),
            Target::Migration("Init".into())
        );
    }

    #[test]
    fn test_apply_and_revert() {
        let store = store();
        let runner = MigrationRunner::default();

        runner.apply(&create(1, "Users"), &store).unwrap();
        assert!(store.snapshot().unwrap().contains("Users"));
        assert_eq!(store.history().len(), 1);

        let reverted = runner.revert(&store).unwrap();
        assert_eq!(reverted.name, "CreateUsers");
        assert!(store.snapshot().unwrap().is_empty());
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_apply_twice_conflicts() {
        let store = store();
        let runner = MigrationRunner::default();
        let migration = create(1, "Users");

        runner.apply(&migration, &store).unwrap();
        let err = runner.apply(&migration, &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_out_of_order_apply() {
        let store = store();
        let runner = MigrationRunner::default();

        runner.apply(&create(5, "Users"), &store).unwrap();
        let err = runner.apply(&create(3, "Orders"), &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Order);
        assert!(!store.snapshot().unwrap().contains("Orders"));
    }

    #[test]
    fn test_cancelled_run_rolls_back() {
        let store = store();
        let runner = MigrationRunner::default();
        runner.cancel_flag().cancel();

        let err = runner.apply(&create(1, "Users"), &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(store.snapshot().unwrap().is_empty());
        assert!(store.history().is_empty());

        runner.cancel_flag().reset();
        runner.apply(&create(1, "Users"), &store).unwrap();
    }

    #[test]
    fn test_transaction_timeout() {
        let store = store();
        let runner =
            MigrationRunner::new(RunnerConfig::default().transaction_timeout(Duration::ZERO));

        // a zero budget is spent before the first operation
        let err = runner.apply(&create(1, "Users"), &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_lock_timeout() {
        let store = store();
        let runner =
            MigrationRunner::new(RunnerConfig::default().lock_timeout(Duration::from_millis(20)));

        let _held = AdvisoryLock::acquire(store.id(), Duration::from_millis(10)).unwrap();
        let err = runner.apply(&create(1, "Users"), &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockTimeout);
        assert!(store.history().is_empty());
    }
    #[test]
    fn test_cancel_between_operations_rolls_back() {
        fn table(name: &str) -> TableDef {
            TableDef::new(name)
                .with_column(ColumnDef::new("Id", ColumnType::Int))
                .with_primary_key(["Id"])
        }

        let store = store();
        let migration = ScriptGenerator::generate(
            MigrationId::new(1, "Init").unwrap(),
            vec![
                Operation::CreateTable { table: table("Users") },
                Operation::CreateTable { table: table("Orders") },
                Operation::CreateTable { table: table("Items") },
            ],
            &GeneratorOptions::default(),
        )
        .unwrap();

        let cancel = CancelFlag::default();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let runner = {
            let cancel = cancel.clone();
            let seen = Arc::clone(&seen);
            MigrationRunner::default()
                .with_cancel_flag(cancel.clone())
                .with_progress(move |step| {
                    let mut seen = seen.lock();
                    seen.push(step.index);
                    // only the first run is interrupted, after its first step
                    if seen.len() == 1 {
                        cancel.cancel();
                    }
                })
        };

        let err = runner.apply(&migration, &store).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(*seen.lock(), vec![0]);
        assert!(store.snapshot().unwrap().is_empty());
        assert!(store.history().is_empty());

        cancel.reset();
        runner.apply(&migration, &store).unwrap();
        assert_eq!(*seen.lock(), vec![0, 0, 1, 2]);
        assert_eq!(store.snapshot().unwrap().tables.len(), 3);
    }

    #[test]
    fn test_irreversible_down_step_reverts() {
        let store = store();
        let runner = MigrationRunner::default();
        let migration = ScriptGenerator::generate(
            MigrationId::new(1, "Seed").unwrap(),
            vec![
                Operation::CreateTable {
                    table: TableDef::new("Users")
                        .with_column(ColumnDef::new("Id", ColumnType::Int))
                        .with_primary_key(["Id"]),
                },
                Operation::Irreversible {
                    reason: "external data import".into(),
                },
            ],
            &GeneratorOptions::default().accept_irreversible(true),
        )
        .unwrap();
        assert!(matches!(migration.down[0], Operation::Irreversible { .. }));

        runner.apply(&migration, &store).unwrap();
        assert_eq!(store.history().len(), 1);

        let reverted = runner.revert(&store).unwrap();
        assert_eq!(reverted.name, "Seed");
        assert!(store.history().is_empty());
        assert!(store.snapshot().unwrap().is_empty());
    }
}
