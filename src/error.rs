//! The engine's closed error taxonomy (spec.md §7).
//!
//! Every variant here is surfaced to the transaction owner; internal
//! invariant violations (negative pin count, unknown redo target page) are
//! programmer errors and `panic!` instead of going through this type.

use thiserror::Error;

use crate::page::{PageId, RowId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("row {0:?} already exists")]
    DuplicateRowId(RowId),

    #[error("row {0:?} not found")]
    Missing(RowId),

    #[error("lock on row {0:?} timed out")]
    LockTimeout(RowId),

    #[error("all buffer pool frames are pinned")]
    BufferExhausted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redo log is corrupt: {0}")]
    CorruptLog(String),

    #[error("page {0:?} is corrupt")]
    CorruptPage(PageId),
}

pub type EngineResult<T> = Result<T, EngineError>;
