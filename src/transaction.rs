//! Transaction Manager (spec.md §4.6): owns transaction identity and
//! per-transaction bookkeeping (undo log, last-written LSN, lifecycle
//! state). Row access, locking and logging are delegated to the other
//! components; this module is the authority on *whose* operation is
//! running and what it takes to undo it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::undo_log::{UndoLog, UndoRecord};

/// Identifies a transaction for the lifetime of the process. Transactions
/// are never reused or recycled — ids only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx_{}", self.0)
    }
}

/// A lightweight, `Copy` handle to a running transaction. The actual undo
/// log and state live in the owning [`TransactionTable`], keyed by `id` —
/// mirroring a "central ledger" rather than a "fat object" design, since
/// the handle is what callers thread through `insert`/`update`/`commit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

struct Entry {
    state: TransactionState,
    undo: UndoLog,
    last_lsn: u64,
}

/// Central bookkeeping for every transaction the engine has ever started.
/// Terminal states are absorbing: once committed or aborted, an entry's
/// state never changes again, though its undo log is drained at that point
/// to bound memory.
pub struct TransactionTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<TransactionId, Entry>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin(&self) -> Transaction {
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.lock().unwrap().insert(
            id,
            Entry {
                state: TransactionState::Active,
                undo: UndoLog::new(),
                last_lsn: 0,
            },
        );
        Transaction { id }
    }

    pub fn state(&self, tx: TransactionId) -> Option<TransactionState> {
        self.entries.lock().unwrap().get(&tx).map(|e| e.state)
    }

    pub fn push_undo(&self, tx: TransactionId, record: UndoRecord) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&tx) {
            entry.undo.push(record);
        }
    }

    pub fn set_last_lsn(&self, tx: TransactionId, lsn: u64) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&tx) {
            entry.last_lsn = lsn;
        }
    }

    pub fn last_lsn(&self, tx: TransactionId) -> u64 {
        self.entries
            .lock()
            .unwrap()
            .get(&tx)
            .map(|e| e.last_lsn)
            .unwrap_or(0)
    }

    /// Marks `tx` committed and discards its undo log — committed work is
    /// never undone (spec.md §3).
    pub fn mark_committed(&self, tx: TransactionId) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&tx) {
            entry.state = TransactionState::Committed;
            entry.undo = UndoLog::new();
        }
    }

    /// Marks `tx` aborted and hands back its undo log (oldest-first
    /// drained, i.e. already in rollback-apply order) for the caller to
    /// replay against the buffer pool.
    pub fn take_for_rollback(&self, tx: TransactionId) -> Vec<UndoRecord> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&tx) {
            Some(entry) => {
                entry.state = TransactionState::Aborted;
                std::mem::replace(&mut entry.undo, UndoLog::new())
                    .into_reverse()
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// The minimum `last_lsn` among still-active transactions, used by
    /// checkpoint truncation (spec.md §4.7). `None` if none are active.
    pub fn min_active_last_lsn(&self) -> Option<u64> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.state == TransactionState::Active)
            .map(|e| e.last_lsn)
            .min()
    }
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageId, RowId};

    #[test]
    fn begin_assigns_strictly_increasing_ids() {
        let table = TransactionTable::new();
        let a = table.begin();
        let b = table.begin();
        assert!(b.id.0 > a.id.0);
        assert_eq!(table.state(a.id), Some(TransactionState::Active));
    }

    #[test]
    fn commit_discards_the_undo_log() {
        let table = TransactionTable::new();
        let tx = table.begin();
        table.push_undo(
            tx.id,
            UndoRecord::Insert { row_id: RowId(1), page_id: PageId(1) },
        );
        table.mark_committed(tx.id);
        assert_eq!(table.state(tx.id), Some(TransactionState::Committed));
        assert!(table.take_for_rollback(tx.id).is_empty());
    }

    #[test]
    fn rollback_returns_undo_records_in_lifo_order() {
        let table = TransactionTable::new();
        let tx = table.begin();
        table.push_undo(
            tx.id,
            UndoRecord::Insert { row_id: RowId(1), page_id: PageId(1) },
        );
        table.push_undo(
            tx.id,
            UndoRecord::Insert { row_id: RowId(2), page_id: PageId(1) },
        );

        let records = table.take_for_rollback(tx.id);
        let order: Vec<RowId> = records.iter().map(|r| r.row_id()).collect();
        assert_eq!(order, vec![RowId(2), RowId(1)]);
        assert_eq!(table.state(tx.id), Some(TransactionState::Aborted));
    }

    #[test]
    fn min_active_last_lsn_ignores_terminal_transactions() {
        let table = TransactionTable::new();
        let a = table.begin();
        let b = table.begin();
        table.set_last_lsn(a.id, 10);
        table.set_last_lsn(b.id, 5);
        table.mark_committed(b.id);
        assert_eq!(table.min_active_last_lsn(), Some(10));
    }
}
