//! Lock Table (spec.md §4.3): in-memory, row-level exclusive locks with
//! strict two-phase locking.
//!
//! Deadlock policy is "no detection": the core prescribes a total order on
//! row ids and expects callers that touch multiple rows in one transaction
//! to acquire them in ascending order. What this table *does* guarantee is a
//! bounded wait — `acquire` raises `LOCK_TIMEOUT` once `lock_timeout_ms`
//! elapses, per spec.md §4.3's fallback requirement. (The lineage this crate
//! is descended from instead builds a wait-for graph and aborts on a
//! detected cycle — see DESIGN.md for why that path wasn't carried forward.)

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{EngineError, EngineResult};
use crate::page::RowId;
use crate::transaction::TransactionId;

struct RowLock {
    owner: Option<TransactionId>,
    /// FIFO queue of transactions waiting on this row, in arrival order.
    /// The lock is only granted to the waiter at the front.
    waiters: VecDeque<TransactionId>,
}

struct State {
    locks: HashMap<RowId, RowLock>,
    holdings: HashMap<TransactionId, Vec<RowId>>,
}

/// Grants row-level exclusive locks, keyed by row id, with owner tracking
/// for re-entrance and release-by-transaction.
pub struct LockTable {
    state: Mutex<State>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                locks: HashMap::new(),
                holdings: HashMap::new(),
            }),
            released: Condvar::new(),
        }
    }

    /// Blocks until `tx` reaches the front of `row_id`'s FIFO wait queue and
    /// the row is unowned, then grants it. Re-entrant: a no-op if `tx`
    /// already holds it.
    pub fn acquire(&self, tx: TransactionId, row_id: RowId, timeout_ms: u64) -> EngineResult<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut state = self.state.lock().unwrap();

        if matches!(state.locks.get(&row_id), Some(lock) if lock.owner == Some(tx)) {
            return Ok(());
        }

        {
            let entry = state
                .locks
                .entry(row_id)
                .or_insert_with(|| RowLock { owner: None, waiters: VecDeque::new() });
            if !entry.waiters.contains(&tx) {
                entry.waiters.push_back(tx);
            }
        }

        loop {
            let granted = {
                let entry = state.locks.get(&row_id).expect("just inserted above");
                entry.owner.is_none() && entry.waiters.front() == Some(&tx)
            };

            if granted {
                let entry = state.locks.get_mut(&row_id).expect("just inserted above");
                entry.owner = Some(tx);
                entry.waiters.pop_front();
                state.holdings.entry(tx).or_default().push(row_id);
                debug!("tx {:?} acquired lock on {:?}", tx, row_id);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                if let Some(entry) = state.locks.get_mut(&row_id) {
                    entry.waiters.retain(|&w| w != tx);
                }
                return Err(EngineError::LockTimeout(row_id));
            }

            let (guard, timeout_result) = self
                .released
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            let _ = timeout_result;
        }
    }

    /// Releases every lock owned by `tx`, atomically. The row's queue entry
    /// stays behind (unowned) so any still-waiting transactions keep their
    /// place in line.
    pub fn release_all(&self, tx: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(rows) = state.holdings.remove(&tx) {
            for row_id in rows {
                if let Some(entry) = state.locks.get_mut(&row_id) {
                    if entry.owner == Some(tx) {
                        entry.owner = None;
                    }
                }
            }
        }
        debug!("tx {:?} released all locks", tx);
        self.released.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self, row_id: RowId) -> bool {
        self.state
            .lock()
            .unwrap()
            .locks
            .get(&row_id)
            .map_or(false, |lock| lock.owner.is_some())
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_is_reentrant_for_the_same_owner() {
        let table = LockTable::new();
        let tx = TransactionId(1);
        table.acquire(tx, RowId(1), 1000).unwrap();
        table.acquire(tx, RowId(1), 1000).unwrap();
        assert!(table.is_held(RowId(1)));
    }

    #[test]
    fn release_all_frees_every_row_the_transaction_held() {
        let table = LockTable::new();
        let tx = TransactionId(1);
        table.acquire(tx, RowId(1), 1000).unwrap();
        table.acquire(tx, RowId(2), 1000).unwrap();
        table.release_all(tx);
        assert!(!table.is_held(RowId(1)));
        assert!(!table.is_held(RowId(2)));
    }

    #[test]
    fn second_transaction_blocks_then_proceeds_after_release() {
        let table = Arc::new(LockTable::new());
        let tx1 = TransactionId(1);
        let tx2 = TransactionId(2);

        table.acquire(tx1, RowId(1), 5000).unwrap();

        let table2 = Arc::clone(&table);
        let handle = thread::spawn(move || {
            table2.acquire(tx2, RowId(1), 5000).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        table.release_all(tx1);
        handle.join().unwrap();
        assert!(table.is_held(RowId(1)));
    }

    #[test]
    fn acquire_times_out_when_never_released() {
        let table = LockTable::new();
        let tx1 = TransactionId(1);
        let tx2 = TransactionId(2);

        table.acquire(tx1, RowId(1), 5000).unwrap();
        let err = table.acquire(tx2, RowId(1), 50).unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout(RowId(1))));
    }
}
