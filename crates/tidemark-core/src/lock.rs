//! Advisory lock serializing migration runs per store.
//!
//! Within a process the lock is a registry of held store ids guarded by a
//! condition variable. Across processes sled's own file lock keeps a second
//! process from opening the same store; [`open_store`] waits on it with the
//! same timeout.

use crate::migration::MigrationError;
use crate::store::{SledStore, StoreConfig};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

static HELD: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());
static RELEASED: Condvar = Condvar::new();

/// Poll interval while another process holds the store.
const OPEN_RETRY: Duration = Duration::from_millis(50);

/// Held advisory lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    store: String,
}

impl LockGuard {
    /// Store the lock is held for.
    pub fn store(&self) -> &str {
        &self.store
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        HELD.lock().remove(&self.store);
        RELEASED.notify_all();
        debug!(store = %self.store, "migration lock released");
    }
}

/// Process-wide advisory lock keyed by store identity.
pub struct AdvisoryLock;

impl AdvisoryLock {
    /// Acquire the lock for `store`, waiting at most `timeout`.
    pub fn acquire(store: &str, timeout: Duration) -> Result<LockGuard, MigrationError> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut held = HELD.lock();

        while held.contains(store) {
            if RELEASED.wait_until(&mut held, deadline).timed_out() && held.contains(store) {
                return Err(MigrationError::LockTimeout {
                    store: store.to_string(),
                    waited: started.elapsed(),
                });
            }
        }

        held.insert(store.to_string());
        debug!(store, "migration lock acquired");
        Ok(LockGuard {
            store: store.to_string(),
        })
    }

    /// Check whether the lock for `store` is held in this process.
    pub fn is_held(store: &str) -> bool {
        HELD.lock().contains(store)
    }
}

/// Open a store, waiting up to `timeout` while another process has it open.
pub fn open_store(config: StoreConfig, timeout: Duration) -> Result<SledStore, MigrationError> {
    let started = Instant::now();
    loop {
        match SledStore::open(config.clone()) {
            Ok(store) => return Ok(store),
            Err(crate::error::Error::Storage(sled::Error::Io(e)))
                if is_lock_contention(&e) && started.elapsed() < timeout =>
            {
                std::thread::sleep(OPEN_RETRY);
            }
            Err(crate::error::Error::Storage(sled::Error::Io(e))) if is_lock_contention(&e) => {
                return Err(MigrationError::LockTimeout {
                    store: config.path.display().to_string(),
                    waited: started.elapsed(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn is_lock_contention(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock || e.to_string().contains("could not acquire lock")
}
