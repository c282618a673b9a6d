//! Redo Log (spec.md §3, §4.5): the durable, LSN-ordered record of every
//! committed change, replayed on recovery.
//!
//! The log is kept as a whole-blob artifact in the Disk Store rather than an
//! append-at-offset file: the Disk Store already gives per-blob atomicity
//! for free, so a rewrite-the-whole-sequence model is simpler than tracking
//! byte offsets and gets the same durability guarantee. `append` only
//! buffers in memory (spec.md §4.5); nothing is visible on disk until
//! `flush_through` runs.

use log::info;

use crate::codec::{read_bytes_field, write_bytes, write_u64, write_u8, Cursor};
use crate::disk_store::FsDiskStore;
use crate::error::{EngineError, EngineResult};
use crate::page::PageId;
use crate::transaction::TransactionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedoPayload {
    /// Marks the first record a transaction ever writes.
    Start,
    /// An ordinary after-image write, produced by insert/update/delete.
    Update { page_id: PageId, after_image: Vec<u8> },
    /// Written while undoing `page_id` during rollback. Always replayed on
    /// recovery, even for transactions that never committed (spec.md §4.5's
    /// "compensation records are always replayed" rule) — this is what
    /// makes a rollback crash-safe without its own durability mechanism.
    Compensation { page_id: PageId, after_image: Vec<u8> },
    /// Marks a transaction durably committed. Ordinary records with a lower
    /// LSN than this transaction's `Start` are only replayed once its
    /// `Commit` has been observed.
    Commit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedoRecord {
    pub lsn: u64,
    pub txid: TransactionId,
    pub payload: RedoPayload,
}

const TAG_START: u8 = 0;
const TAG_UPDATE: u8 = 1;
const TAG_COMPENSATION: u8 = 2;
const TAG_COMMIT: u8 = 3;

fn encode_records(records: &[RedoRecord]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u64(&mut buf, records.len() as u64);
    for record in records {
        write_u64(&mut buf, record.lsn);
        write_u64(&mut buf, record.txid.0);
        match &record.payload {
            RedoPayload::Start => write_u8(&mut buf, TAG_START),
            RedoPayload::Update { page_id, after_image } => {
                write_u8(&mut buf, TAG_UPDATE);
                write_u64(&mut buf, page_id.0);
                write_bytes(&mut buf, after_image);
            }
            RedoPayload::Compensation { page_id, after_image } => {
                write_u8(&mut buf, TAG_COMPENSATION);
                write_u64(&mut buf, page_id.0);
                write_bytes(&mut buf, after_image);
            }
            RedoPayload::Commit => write_u8(&mut buf, TAG_COMMIT),
        }
    }
    buf
}

fn decode_records(bytes: &[u8]) -> Option<Vec<RedoRecord>> {
    let mut cur = Cursor::new(bytes);
    let count = cur.read_u64()?;
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let lsn = cur.read_u64()?;
        let txid = TransactionId(cur.read_u64()?);
        let payload = match cur.read_u8()? {
            TAG_START => RedoPayload::Start,
            TAG_UPDATE => RedoPayload::Update {
                page_id: PageId(cur.read_u64()?),
                after_image: read_bytes_field(&mut cur)?,
            },
            TAG_COMPENSATION => RedoPayload::Compensation {
                page_id: PageId(cur.read_u64()?),
                after_image: read_bytes_field(&mut cur)?,
            },
            TAG_COMMIT => RedoPayload::Commit,
            _ => return None,
        };
        records.push(RedoRecord { lsn, txid, payload });
    }
    Some(records)
}

/// The redo log: an in-memory buffer that is periodically made durable.
pub struct RedoLog {
    records: Vec<RedoRecord>,
    next_lsn: u64,
}

impl RedoLog {
    /// Loads whatever was last made durable (empty if this is a fresh
    /// data directory).
    pub fn load(disk: &FsDiskStore) -> EngineResult<Self> {
        let records = match disk.read_redo_log()? {
            Some(bytes) => decode_records(&bytes)
                .ok_or_else(|| EngineError::CorruptLog("redo log blob did not decode".into()))?,
            None => Vec::new(),
        };
        let next_lsn = records.last().map(|r| r.lsn + 1).unwrap_or(1);
        Ok(Self { records, next_lsn })
    }

    /// Buffers `payload` under a freshly minted LSN and returns it. Not
    /// durable until `flush_through` is called with an LSN at or past it.
    pub fn append(&mut self, txid: TransactionId, payload: RedoPayload) -> u64 {
        let lsn = self.reserve_lsn();
        self.record(lsn, txid, payload);
        lsn
    }

    /// Mints the next LSN without buffering anything yet. Used when a
    /// record's own payload needs to be built with that LSN already baked
    /// in — a page's after-image carries its own `lsn` field, so the page
    /// must be stamped with the LSN before it is encoded, not after.
    pub fn reserve_lsn(&mut self) -> u64 {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        lsn
    }

    /// Buffers a record under a previously reserved LSN.
    pub fn record(&mut self, lsn: u64, txid: TransactionId, payload: RedoPayload) {
        self.records.push(RedoRecord { lsn, txid, payload });
    }

    /// Makes every buffered record durable. Since the whole log is rewritten
    /// as one blob, this trivially covers every record with `lsn` at or
    /// below the requested one.
    pub fn flush_through(&mut self, _lsn: u64, disk: &FsDiskStore) -> EngineResult<()> {
        disk.write_redo_log(&encode_records(&self.records))?;
        disk.flush()?;
        Ok(())
    }

    /// Drops every record with `lsn` strictly below `keep_from_lsn` and
    /// persists the shortened log (spec.md §4.7 checkpoint truncation).
    pub fn truncate_before(&mut self, keep_from_lsn: u64, disk: &FsDiskStore) -> EngineResult<()> {
        let before = self.records.len();
        self.records.retain(|r| r.lsn >= keep_from_lsn);
        info!(
            "redo log truncated: {} -> {} records (keep_from_lsn={})",
            before,
            self.records.len(),
            keep_from_lsn
        );
        self.flush_through(self.next_lsn, disk)
    }

    /// Every durable record with `lsn >= from_lsn`, in LSN order.
    pub fn replay(&self, from_lsn: u64) -> impl Iterator<Item = &RedoRecord> {
        self.records.iter().filter(move |r| r.lsn >= from_lsn)
    }

    pub fn durable_records(&self) -> &[RedoRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_increasing_lsns_and_buffers_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FsDiskStore::open(dir.path()).unwrap();
        let mut log = RedoLog::load(&disk).unwrap();

        let tx = TransactionId(1);
        let lsn1 = log.append(tx, RedoPayload::Start);
        let lsn2 = log.append(
            tx,
            RedoPayload::Update {
                page_id: PageId(1),
                after_image: vec![1, 2, 3],
            },
        );
        assert!(lsn2 > lsn1);
        assert!(disk.read_redo_log().unwrap().is_none());
    }

    #[test]
    fn flush_then_reload_round_trips_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FsDiskStore::open(dir.path()).unwrap();
        let tx = TransactionId(1);

        {
            let mut log = RedoLog::load(&disk).unwrap();
            let lsn = log.append(tx, RedoPayload::Start);
            log.append(
                tx,
                RedoPayload::Update {
                    page_id: PageId(2),
                    after_image: vec![9, 9],
                },
            );
            log.append(tx, RedoPayload::Commit);
            log.flush_through(lsn, &disk).unwrap();
        }

        let reloaded = RedoLog::load(&disk).unwrap();
        assert_eq!(reloaded.durable_records().len(), 3);
        assert_eq!(reloaded.replay(1).count(), 3);
    }

    #[test]
    fn truncate_before_drops_older_records() {
        let dir = tempfile::tempdir().unwrap();
        let disk = FsDiskStore::open(dir.path()).unwrap();
        let tx = TransactionId(1);
        let mut log = RedoLog::load(&disk).unwrap();

        let lsn1 = log.append(tx, RedoPayload::Start);
        let lsn2 = log.append(tx, RedoPayload::Commit);
        log.flush_through(lsn2, &disk).unwrap();

        log.truncate_before(lsn2, &disk).unwrap();
        assert_eq!(log.replay(1).count(), 1);
        assert_eq!(log.replay(1).next().unwrap().lsn, lsn2);
        let _ = lsn1;
    }
}
