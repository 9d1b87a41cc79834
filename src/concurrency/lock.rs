//! Shared/exclusive page locks with two-phase discipline.
//!
//! The lock table maps a page to the set of transactions currently holding it
//! and the mode each holds. Deadlocks are broken by bounded waiting rather
//! than a wait-for graph: [`LockManager::acquire`] gives up after the caller's
//! timeout and signals the transaction to abort. The one request that never
//! waits is a shared-to-exclusive upgrade blocked by other readers, because
//! two symmetric upgraders would deadlock with certainty.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;

/// Granularity of time slices spent blocked on the condvar between retries.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

type LockTable = HashMap<PageId, HashMap<TransactionId, LockMode>>;

/// Page-granularity lock manager.
///
/// Invariants on the table: a page entry holding an `Exclusive` lock has
/// exactly one holder; an entry that loses its last holder is removed rather
/// than kept empty.
pub struct LockManager {
    table: Mutex<LockTable>,
    waiters: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            waiters: Condvar::new(),
        }
    }

    /// One non-blocking acquisition step.
    ///
    /// Returns `Ok(true)` when the lock is held on return, `Ok(false)` when
    /// the request must wait for other holders to release, and
    /// `Err(UpgradeConflict)` when a shared-to-exclusive upgrade is blocked
    /// by other readers.
    pub fn try_acquire(
        &self,
        page_id: PageId,
        txn: TransactionId,
        mode: LockMode,
    ) -> StorageResult<bool> {
        let mut table = self.table.lock();
        Self::step(&mut table, page_id, txn, mode)
    }

    /// Acquires the lock, waiting up to `timeout` for conflicting holders to
    /// release. Fails with a transaction-abort condition on timeout or on an
    /// upgrade conflict.
    pub fn acquire(
        &self,
        page_id: PageId,
        txn: TransactionId,
        mode: LockMode,
        timeout: Duration,
    ) -> StorageResult<()> {
        let start = Instant::now();
        let mut table = self.table.lock();
        loop {
            if Self::step(&mut table, page_id, txn, mode)? {
                return Ok(());
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                log::debug!("{} timed out waiting for {:?} on {}", txn, mode, page_id);
                return Err(StorageError::LockTimeout {
                    txn,
                    page_id,
                    waited_ms: elapsed.as_millis() as u64,
                });
            }
            let remaining = timeout - elapsed;
            self.waiters
                .wait_for(&mut table, remaining.min(WAIT_SLICE));
        }
    }

    fn step(
        table: &mut LockTable,
        page_id: PageId,
        txn: TransactionId,
        mode: LockMode,
    ) -> StorageResult<bool> {
        let Some(holders) = table.get_mut(&page_id) else {
            // No lock on the page: grant in the requested mode.
            table.insert(page_id, HashMap::from([(txn, mode)]));
            log::trace!("{} granted {:?} on uncontended {}", txn, mode, page_id);
            return Ok(true);
        };

        match holders.get(&txn).copied() {
            // Re-entrant request. Shared is satisfied by any held mode;
            // exclusive is satisfied if already exclusive, upgraded in place
            // if this transaction is the sole reader, and refused outright if
            // other readers share the page.
            Some(held) => match mode {
                LockMode::Shared => Ok(true),
                LockMode::Exclusive if held == LockMode::Exclusive => Ok(true),
                LockMode::Exclusive if holders.len() == 1 => {
                    holders.insert(txn, LockMode::Exclusive);
                    log::debug!("{} upgraded to exclusive on {}", txn, page_id);
                    Ok(true)
                }
                LockMode::Exclusive => {
                    log::debug!(
                        "{} upgrade on {} refused: {} other reader(s)",
                        txn,
                        page_id,
                        holders.len() - 1
                    );
                    Err(StorageError::UpgradeConflict { txn, page_id })
                }
            },
            // Fresh request against existing holders. A shared request joins
            // an all-shared set; everything else defers.
            None => {
                let all_shared = holders.values().all(|m| *m == LockMode::Shared);
                if mode == LockMode::Shared && all_shared {
                    holders.insert(txn, LockMode::Shared);
                    log::trace!("{} joined shared holders of {}", txn, page_id);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// True if `txn` holds a lock of any mode on `page_id`.
    pub fn holds(&self, page_id: PageId, txn: TransactionId) -> bool {
        self.table
            .lock()
            .get(&page_id)
            .map(|holders| holders.contains_key(&txn))
            .unwrap_or(false)
    }

    /// Releases `txn`'s lock on `page_id`, if held, and wakes waiters. The
    /// page's table entry is removed once its last lock goes away.
    pub fn release(&self, page_id: PageId, txn: TransactionId) {
        let mut table = self.table.lock();
        if let Some(holders) = table.get_mut(&page_id) {
            if holders.remove(&txn).is_some() {
                log::trace!("{} released lock on {}", txn, page_id);
            }
            if holders.is_empty() {
                table.remove(&page_id);
            }
        }
        self.waiters.notify_all();
    }

    /// Releases every lock `txn` holds. Idempotent: a second call is a no-op.
    pub fn release_all(&self, txn: TransactionId) {
        let mut table = self.table.lock();
        table.retain(|_, holders| {
            holders.remove(&txn);
            !holders.is_empty()
        });
        self.waiters.notify_all();
    }

    /// Pages on which `txn` currently holds a lock.
    pub fn held_pages(&self, txn: TransactionId) -> Vec<PageId> {
        self.table
            .lock()
            .iter()
            .filter(|(_, holders)| holders.contains_key(&txn))
            .map(|(page_id, _)| *page_id)
            .collect()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
