//! Undo Log (spec.md §3, §4.5): a per-transaction, append-only sequence of
//! inverse operations, consumed in reverse on rollback.
//!
//! Undo records never touch the durable redo log — they live in memory only
//! and are discarded on commit. Rollback of uncommitted work after a crash
//! is implicit: a crashed transaction produced no COMMIT marker, so redo
//! will not reapply its ordinary records (spec.md §4.5).

use crate::page::{PageId, RowId};

/// A closed sum over the undo op kind, tagged with exactly the payload each
/// needs to invert the original operation (spec.md §9: "tagged variants, not
/// subclasses"). `page_id` pins down where to apply the inverse without
/// depending on the index still pointing at it — important for `Delete`,
/// whose row the index no longer knows about by the time rollback runs.
#[derive(Debug, Clone)]
pub enum UndoRecord {
    /// Inverse: delete the row.
    Insert { row_id: RowId, page_id: PageId },
    /// Inverse: overwrite the row with `before`.
    Update {
        row_id: RowId,
        page_id: PageId,
        before: Vec<u8>,
    },
    /// Inverse: reinsert the row with `before`.
    Delete {
        row_id: RowId,
        page_id: PageId,
        before: Vec<u8>,
    },
}

impl UndoRecord {
    pub fn row_id(&self) -> RowId {
        match self {
            UndoRecord::Insert { row_id, .. } => *row_id,
            UndoRecord::Update { row_id, .. } => *row_id,
            UndoRecord::Delete { row_id, .. } => *row_id,
        }
    }
}

/// FIFO-append, LIFO-apply per-transaction undo sequence.
#[derive(Debug, Default)]
pub struct UndoLog {
    records: Vec<UndoRecord>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    pub fn push(&mut self, record: UndoRecord) {
        self.records.push(record);
    }

    /// Consumes the log, yielding records oldest-appended-last (i.e. in
    /// rollback/apply order).
    pub fn into_reverse(self) -> impl Iterator<Item = UndoRecord> {
        self.records.into_iter().rev()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
