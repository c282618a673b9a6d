//! Engine Facade (spec.md §6): the single entry point composing every
//! component into one transactional store.
//!
//! `Engine::open` owns everything directly — there is no global singleton
//! the way the lineage this crate descends from reaches for a `Database`
//! behind a `OnceCell`. Multiple engines over different data directories can
//! coexist in one process, and the borrow checker gets to do its job.

use std::path::Path;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::buffer_pool::BufferPool;
use crate::config::EngineConfig;
use crate::disk_store::FsDiskStore;
use crate::dwb;
use crate::error::{EngineError, EngineResult};
use crate::index::BPlusTree;
use crate::lock_table::LockTable;
use crate::page::{PageId, Row, RowId};
use crate::redo_log::{RedoLog, RedoPayload, RedoRecord};
use crate::transaction::{Transaction, TransactionId, TransactionState, TransactionTable};
use crate::undo_log::UndoRecord;

/// Tracks which page new rows get appended to, so consecutive inserts don't
/// all scan from page zero.
struct Placement {
    active_page: Option<PageId>,
}

pub struct Engine {
    config: EngineConfig,
    disk: Arc<FsDiskStore>,
    index: Mutex<BPlusTree>,
    buffer_pool: Mutex<BufferPool>,
    redo_log: Arc<Mutex<RedoLog>>,
    lock_table: LockTable,
    tx_table: TransactionTable,
    placement: Mutex<Placement>,
}

impl Engine {
    /// Opens (or creates) the engine's data directory, repairing any torn
    /// write left by a crashed checkpoint and replaying the redo log before
    /// returning (spec.md §4.8).
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        let disk = Arc::new(FsDiskStore::open(&config.data_dir)?);

        dwb::repair_on_recovery(&disk)?;

        let index = match disk.read_index()? {
            Some(bytes) => BPlusTree::decode(&bytes)
                .ok_or_else(|| EngineError::CorruptLog("index blob did not decode".into()))?,
            None => BPlusTree::new(config.bplustree_t),
        };

        let redo_log = RedoLog::load(&disk)?;
        replay_redo(&redo_log, &disk)?;
        let redo_log = Arc::new(Mutex::new(redo_log));

        let buffer_pool = BufferPool::new(
            config.buffer_pool_size,
            Arc::clone(&disk),
            Arc::clone(&redo_log),
        )?;

        info!("engine opened at {:?}", config.data_dir);

        Ok(Self {
            config,
            disk,
            index: Mutex::new(index),
            buffer_pool: Mutex::new(buffer_pool),
            redo_log,
            lock_table: LockTable::new(),
            tx_table: TransactionTable::new(),
            placement: Mutex::new(Placement { active_page: None }),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn begin(&self) -> Transaction {
        self.tx_table.begin()
    }

    pub fn insert(&self, tx: Transaction, row: Row) -> EngineResult<()> {
        self.assert_active(tx);
        let row_id = row.id;
        self.lock_table
            .acquire(tx.id, row_id, self.config.lock_timeout_ms)?;

        if self.index.lock().unwrap().get(row_id).is_some() {
            return Err(EngineError::DuplicateRowId(row_id));
        }

        let page_id = self.page_for_new_row()?;
        let mut bp = self.buffer_pool.lock().unwrap();
        bp.fetch(page_id)?;
        bp.page_mut(page_id).push(row);
        let (lsn, after_image) = self.stamp_and_encode(&mut bp, page_id);
        bp.mark_dirty(page_id);
        bp.unpin(page_id, true);
        drop(bp);

        self.record_redo(lsn, tx.id, RedoPayload::Update { page_id, after_image });

        self.index.lock().unwrap().put(row_id, page_id);
        self.tx_table
            .push_undo(tx.id, UndoRecord::Insert { row_id, page_id });

        Ok(())
    }

    pub fn read(&self, tx: Transaction, row_id: RowId) -> EngineResult<Row> {
        self.assert_active(tx);
        self.lock_table
            .acquire(tx.id, row_id, self.config.lock_timeout_ms)?;

        let page_id = self
            .index
            .lock()
            .unwrap()
            .get(row_id)
            .ok_or(EngineError::Missing(row_id))?;

        let mut bp = self.buffer_pool.lock().unwrap();
        bp.fetch(page_id)?;
        let row = bp
            .page(page_id)
            .find(row_id)
            .cloned()
            .ok_or(EngineError::Missing(row_id));
        bp.unpin(page_id, false);
        row
    }

    pub fn update(&self, tx: Transaction, row_id: RowId, payload: Vec<u8>) -> EngineResult<()> {
        self.assert_active(tx);
        self.lock_table
            .acquire(tx.id, row_id, self.config.lock_timeout_ms)?;

        let page_id = self
            .index
            .lock()
            .unwrap()
            .get(row_id)
            .ok_or(EngineError::Missing(row_id))?;

        let mut bp = self.buffer_pool.lock().unwrap();
        bp.fetch(page_id)?;
        let before = bp
            .page_mut(page_id)
            .overwrite(row_id, payload)
            .ok_or(EngineError::Missing(row_id))?;
        let (lsn, after_image) = self.stamp_and_encode(&mut bp, page_id);
        bp.mark_dirty(page_id);
        bp.unpin(page_id, true);
        drop(bp);

        self.record_redo(lsn, tx.id, RedoPayload::Update { page_id, after_image });

        self.tx_table.push_undo(
            tx.id,
            UndoRecord::Update { row_id, page_id, before },
        );
        Ok(())
    }

    pub fn delete(&self, tx: Transaction, row_id: RowId) -> EngineResult<()> {
        self.assert_active(tx);
        self.lock_table
            .acquire(tx.id, row_id, self.config.lock_timeout_ms)?;

        let page_id = self
            .index
            .lock()
            .unwrap()
            .get(row_id)
            .ok_or(EngineError::Missing(row_id))?;

        let mut bp = self.buffer_pool.lock().unwrap();
        bp.fetch(page_id)?;
        let removed = bp
            .page_mut(page_id)
            .remove(row_id)
            .ok_or(EngineError::Missing(row_id))?;
        let (lsn, after_image) = self.stamp_and_encode(&mut bp, page_id);
        bp.mark_dirty(page_id);
        bp.unpin(page_id, true);
        drop(bp);

        self.record_redo(lsn, tx.id, RedoPayload::Update { page_id, after_image });

        self.index.lock().unwrap().delete(row_id);
        self.tx_table.push_undo(
            tx.id,
            UndoRecord::Delete { row_id, page_id, before: removed.payload },
        );
        Ok(())
    }

    /// Durably commits `tx`: writes a COMMIT marker, flushes the redo log
    /// through it, then releases every lock the transaction held.
    pub fn commit(&self, tx: Transaction) -> EngineResult<()> {
        self.assert_active(tx);
        let lsn = self.append_redo(tx.id, RedoPayload::Commit);
        self.redo_log
            .lock()
            .unwrap()
            .flush_through(lsn, &self.disk)?;
        self.tx_table.mark_committed(tx.id);
        self.lock_table.release_all(tx.id);
        Ok(())
    }

    /// Undoes every write `tx` made, in reverse order, then releases its
    /// locks. Each undo step is itself logged as a compensation record so
    /// recovery can replay it unconditionally (spec.md §4.5).
    pub fn rollback(&self, tx: Transaction) -> EngineResult<()> {
        self.assert_active(tx);
        let undo_records = self.tx_table.take_for_rollback(tx.id);

        for record in undo_records {
            let page_id = match &record {
                UndoRecord::Insert { page_id, .. } => *page_id,
                UndoRecord::Update { page_id, .. } => *page_id,
                UndoRecord::Delete { page_id, .. } => *page_id,
            };

            let mut bp = self.buffer_pool.lock().unwrap();
            bp.fetch(page_id)?;
            match record {
                UndoRecord::Insert { row_id, .. } => {
                    bp.page_mut(page_id).remove(row_id);
                    self.index.lock().unwrap().delete(row_id);
                }
                UndoRecord::Update { row_id, before, .. } => {
                    bp.page_mut(page_id).overwrite(row_id, before);
                }
                UndoRecord::Delete { row_id, before, .. } => {
                    bp.page_mut(page_id).push(Row::new(row_id, before));
                    self.index.lock().unwrap().put(row_id, page_id);
                }
            }
            let (lsn, after_image) = self.stamp_and_encode(&mut bp, page_id);
            bp.mark_dirty(page_id);
            bp.unpin(page_id, true);
            drop(bp);

            self.record_redo(lsn, tx.id, RedoPayload::Compensation { page_id, after_image });
        }

        let last_lsn = self.tx_table.last_lsn(tx.id);
        self.redo_log
            .lock()
            .unwrap()
            .flush_through(last_lsn, &self.disk)?;
        self.lock_table.release_all(tx.id);
        Ok(())
    }

    /// Flushes every dirty page through the double-write buffer, persists
    /// the index, and truncates the redo log up to the minimum LSN any
    /// still-active transaction might still need (spec.md §4.7).
    pub fn checkpoint(&self) -> EngineResult<()> {
        // WAL ordering (spec.md §5): in-place writes happen only here, so
        // every redo record buffered so far must be durable first — a dirty
        // page can carry the effects of a record no commit has flushed yet
        // (steal), and that record must still be on disk before its page is.
        self.redo_log
            .lock()
            .unwrap()
            .flush_through(0, &self.disk)?;

        let mut bp = self.buffer_pool.lock().unwrap();
        let dirty = bp.dirty_pages();
        if !dirty.is_empty() {
            bp.flush_pages(&dirty)?;
        }
        drop(bp);

        let index_bytes = self.index.lock().unwrap().encode();
        self.disk.write_index(&index_bytes)?;
        self.disk.flush()?;

        let mut redo = self.redo_log.lock().unwrap();
        let keep_from = match self.tx_table.min_active_last_lsn() {
            Some(lsn) => lsn,
            None => redo.durable_records().last().map(|r| r.lsn + 1).unwrap_or(1),
        };
        redo.truncate_before(keep_from, &self.disk)?;

        info!("checkpoint complete: {} page(s) flushed", dirty.len());
        Ok(())
    }

    fn page_for_new_row(&self) -> EngineResult<PageId> {
        let mut placement = self.placement.lock().unwrap();
        if let Some(page_id) = placement.active_page {
            let mut bp = self.buffer_pool.lock().unwrap();
            bp.fetch(page_id)?;
            let is_full = bp.page(page_id).is_full();
            bp.unpin(page_id, false);
            if !is_full {
                return Ok(page_id);
            }
        }

        let page_id = self
            .buffer_pool
            .lock()
            .unwrap()
            .allocate(self.config.page_capacity)?;
        self.buffer_pool.lock().unwrap().unpin(page_id, true);
        placement.active_page = Some(page_id);
        Ok(page_id)
    }

    /// A transaction handle is only valid for the lifetime between `begin`
    /// and its first `commit`/`rollback`; reusing it afterward would
    /// silently re-acquire released locks and append redo records under a
    /// txid recovery no longer associates with an open transaction.
    fn assert_active(&self, tx: Transaction) {
        assert_eq!(
            self.tx_table.state(tx.id),
            Some(TransactionState::Active),
            "transaction {} is not active",
            tx.id
        );
    }

    fn append_redo(&self, txid: TransactionId, payload: RedoPayload) -> u64 {
        let lsn = self.redo_log.lock().unwrap().append(txid, payload);
        self.tx_table.set_last_lsn(txid, lsn);
        lsn
    }

    /// Mints the LSN a page write will be logged under, stamps the page
    /// with it, and only then encodes the after-image — so the bytes
    /// handed to the redo log always carry the LSN of the very record
    /// they belong to, not the page's previous one.
    fn stamp_and_encode(&self, bp: &mut BufferPool, page_id: PageId) -> (u64, Vec<u8>) {
        let lsn = self.reserve_lsn();
        bp.page_mut(page_id).lsn = lsn;
        (lsn, crate::codec::encode_page(bp.page(page_id)))
    }

    fn reserve_lsn(&self) -> u64 {
        self.redo_log.lock().unwrap().reserve_lsn()
    }

    /// Buffers `payload` under the LSN a prior `stamp_and_encode` call
    /// already minted and baked into its after-image.
    fn record_redo(&self, lsn: u64, txid: TransactionId, payload: RedoPayload) {
        self.redo_log.lock().unwrap().record(lsn, txid, payload);
        self.tx_table.set_last_lsn(txid, lsn);
    }
}

/// Applies every durable redo record whose transaction committed, plus every
/// compensation record unconditionally, directly against the Disk Store
/// (the buffer pool isn't constructed yet at this point in `open`).
fn replay_redo(redo_log: &RedoLog, disk: &FsDiskStore) -> EngineResult<()> {
    let committed: std::collections::HashSet<TransactionId> = redo_log
        .durable_records()
        .iter()
        .filter(|r| matches!(r.payload, RedoPayload::Commit))
        .map(|r| r.txid)
        .collect();

    let mut applied = 0usize;
    for record in redo_log.replay(0) {
        if apply_one(record, &committed, disk)? {
            applied += 1;
        }
    }
    if applied > 0 {
        warn!("recovery: replayed {} redo record(s)", applied);
        disk.flush()?;
    }
    Ok(())
}

fn apply_one(
    record: &RedoRecord,
    committed: &std::collections::HashSet<TransactionId>,
    disk: &FsDiskStore,
) -> EngineResult<bool> {
    match &record.payload {
        RedoPayload::Update { page_id, after_image } => {
            if committed.contains(&record.txid) {
                disk.write_page(*page_id, after_image)?;
                return Ok(true);
            }
            Ok(false)
        }
        RedoPayload::Compensation { page_id, after_image } => {
            disk.write_page(*page_id, after_image)?;
            Ok(true)
        }
        RedoPayload::Start | RedoPayload::Commit => Ok(false),
    }
}
