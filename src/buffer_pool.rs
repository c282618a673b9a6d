//! Buffer Pool (spec.md §4.4): a bounded-capacity cache of pages, backed by
//! the Disk Store, with pin-counted frames and LRU eviction.
//!
//! Recency order is tracked as a plain `Vec<PageId>` rather than an
//! intrusive doubly-linked list. At the pool sizes this engine targets
//! (tens to low hundreds of frames) a linear scan per touch is cheap and the
//! code stays easy to read; a real O(1) replacer (see the `LRU-K` style
//! structures some buffer managers use) would pay for itself at far larger
//! pool sizes than spec.md's single-node scope calls for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::codec::{decode_page, encode_page};
use crate::disk_store::FsDiskStore;
use crate::dwb::{flush_via_dwb, DwbSlot};
use crate::error::{EngineError, EngineResult};
use crate::page::{Page, PageFrame, PageId};
use crate::redo_log::RedoLog;

pub struct BufferPool {
    capacity: usize,
    frames: HashMap<PageId, PageFrame>,
    /// Front = least recently touched, back = most recently touched.
    recency: Vec<PageId>,
    next_page_id: u64,
    disk: Arc<FsDiskStore>,
    /// Shared with `Engine` so an in-place write triggered by eviction (not
    /// just by checkpoint) can still honor the WAL rule (spec.md §5): the
    /// redo log must be durable through a page's `lsn` before that page's
    /// image reaches disk.
    redo_log: Arc<Mutex<RedoLog>>,
}

impl BufferPool {
    pub fn new(
        capacity: usize,
        disk: Arc<FsDiskStore>,
        redo_log: Arc<Mutex<RedoLog>>,
    ) -> EngineResult<Self> {
        let max_existing = disk.enumerate()?.into_iter().map(|p| p.0).max();
        Ok(Self {
            capacity,
            frames: HashMap::new(),
            recency: Vec::new(),
            next_page_id: max_existing.map(|n| n + 1).unwrap_or(0),
            disk,
            redo_log,
        })
    }

    /// Pins `page_id` in memory, loading it from disk (or failing if it
    /// doesn't exist anywhere) if it isn't already resident. Evicts an
    /// unpinned victim if the pool is at capacity; returns
    /// [`EngineError::BufferExhausted`] if every frame is pinned.
    pub fn fetch(&mut self, page_id: PageId) -> EngineResult<()> {
        if self.frames.contains_key(&page_id) {
            self.frames.get_mut(&page_id).unwrap().pin_count += 1;
            self.touch(page_id);
            return Ok(());
        }

        self.make_room()?;

        let bytes = self
            .disk
            .read_page(page_id)?
            .ok_or(EngineError::CorruptPage(page_id))?;
        let page = decode_page(&bytes).ok_or(EngineError::CorruptPage(page_id))?;
        let mut frame = PageFrame::new(page);
        frame.pin_count = 1;
        self.frames.insert(page_id, frame);
        self.recency.push(page_id);
        Ok(())
    }

    /// Allocates a brand new, empty page, pins it and marks it dirty.
    pub fn allocate(&mut self, page_capacity: usize) -> EngineResult<PageId> {
        self.make_room()?;

        let page_id = PageId(self.next_page_id);
        self.next_page_id += 1;

        let mut frame = PageFrame::new(Page::empty(page_id, page_capacity));
        frame.pin_count = 1;
        frame.dirty = true;
        self.frames.insert(page_id, frame);
        self.recency.push(page_id);
        Ok(page_id)
    }

    pub fn unpin(&mut self, page_id: PageId, dirty: bool) {
        if let Some(frame) = self.frames.get_mut(&page_id) {
            assert!(
                frame.pin_count > 0,
                "unpin on page {:?} with pin_count already 0",
                page_id
            );
            frame.pin_count -= 1;
            frame.dirty |= dirty;
        }
    }

    pub fn page(&self, page_id: PageId) -> &Page {
        &self.frames.get(&page_id).expect("page not resident").page
    }

    pub fn page_mut(&mut self, page_id: PageId) -> &mut Page {
        &mut self.frames.get_mut(&page_id).expect("page not resident").page
    }

    pub fn mark_dirty(&mut self, page_id: PageId) {
        if let Some(frame) = self.frames.get_mut(&page_id) {
            frame.dirty = true;
        }
    }

    /// Every dirty page currently resident, ascending by id — the snapshot
    /// a checkpoint stages through the double-write buffer (spec.md §4.7).
    pub fn dirty_pages(&self) -> Vec<PageId> {
        use itertools::Itertools;
        self.frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(id, _)| *id)
            .sorted()
            .collect()
    }

    /// Flushes exactly these pages through the double-write buffer and
    /// clears their dirty bits. Used by checkpoint and, for a singleton
    /// batch, by victim eviction.
    pub fn flush_pages(&mut self, page_ids: &[PageId]) -> EngineResult<()> {
        // WAL rule (spec.md §5): every buffered redo record must be durable
        // before any page it describes is written in place, whether that
        // in-place write is a checkpoint's batch or a single evicted victim.
        self.redo_log.lock().unwrap().flush_through(0, &self.disk)?;

        let slots: Vec<DwbSlot> = page_ids
            .iter()
            .map(|&id| DwbSlot {
                page_id: id,
                image: encode_page(&self.frames[&id].page),
            })
            .collect();
        flush_via_dwb(&self.disk, &slots)?;
        for &id in page_ids {
            if let Some(frame) = self.frames.get_mut(&id) {
                frame.dirty = false;
            }
        }
        Ok(())
    }

    fn touch(&mut self, page_id: PageId) {
        if let Some(pos) = self.recency.iter().position(|&p| p == page_id) {
            self.recency.remove(pos);
        }
        self.recency.push(page_id);
    }

    /// Evicts the least-recently-used unpinned frame if the pool is full.
    /// A no-op when there's already room.
    fn make_room(&mut self) -> EngineResult<()> {
        if self.frames.len() < self.capacity {
            return Ok(());
        }

        let victim_pos = self
            .recency
            .iter()
            .position(|id| self.frames[id].pin_count == 0)
            .ok_or(EngineError::BufferExhausted)?;
        let victim = self.recency.remove(victim_pos);

        if self.frames[&victim].dirty {
            debug!("evicting dirty page {:?}, flushing via dwb first", victim);
            self.flush_pages(&[victim])?;
        }

        self.frames.remove(&victim);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Row, RowId};

    fn pool(capacity: usize) -> (BufferPool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(FsDiskStore::open(dir.path()).unwrap());
        let redo_log = Arc::new(Mutex::new(RedoLog::load(&disk).unwrap()));
        (BufferPool::new(capacity, disk, redo_log).unwrap(), dir)
    }

    #[test]
    fn allocate_then_fetch_after_unpin_sees_the_same_page() {
        let (mut bp, _dir) = pool(4);
        let page_id = bp.allocate(16).unwrap();
        bp.page_mut(page_id).push(Row::new(RowId(1), b"x".to_vec()));
        bp.flush_pages(&[page_id]).unwrap();
        bp.unpin(page_id, false);

        bp.fetch(page_id).unwrap();
        assert_eq!(bp.page(page_id).find(RowId(1)).unwrap().payload, b"x");
    }

    #[test]
    fn eviction_flushes_dirty_victims_before_reclaiming_the_frame() {
        let (mut bp, _dir) = pool(1);
        let first = bp.allocate(16).unwrap();
        bp.page_mut(first).push(Row::new(RowId(1), b"hi".to_vec()));
        bp.unpin(first, true);

        let second = bp.allocate(16).unwrap();
        bp.unpin(second, false);

        bp.fetch(first).unwrap();
        assert_eq!(bp.page(first).find(RowId(1)).unwrap().payload, b"hi");
    }

    #[test]
    fn buffer_exhausted_when_every_frame_is_pinned() {
        let (mut bp, _dir) = pool(1);
        let _first = bp.allocate(16).unwrap();
        let err = bp.allocate(16).unwrap_err();
        assert!(matches!(err, EngineError::BufferExhausted));
    }

    #[test]
    fn dirty_pages_lists_only_unflushed_frames_in_ascending_order() {
        let (mut bp, _dir) = pool(4);
        let a = bp.allocate(16).unwrap();
        bp.unpin(a, false);
        let b = bp.allocate(16).unwrap();
        bp.unpin(b, true);
        assert_eq!(bp.dirty_pages(), vec![b]);
        let _ = a;
    }
}
