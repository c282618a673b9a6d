//! Double-Write Buffer (spec.md §4.7, §4.8): closes the torn-write gap
//! across the *batch* of pages a checkpoint flushes.
//!
//! The Disk Store already writes a single blob atomically, but a checkpoint
//! flushes many page blobs as a batch, and a crash can land between two of
//! those writes. The DWB stages the whole batch's after-images as one
//! durable blob first; only once that staging write is durable do we start
//! overwriting the real page files. If the process dies mid-overwrite,
//! recovery finds a non-empty DWB and replays it to repair whichever pages
//! didn't make it — the staged image is idempotent to reapply.

use log::{info, warn};

use crate::codec::{read_bytes_field, write_bytes, write_u64, Cursor};
use crate::disk_store::FsDiskStore;
use crate::error::EngineResult;
use crate::page::PageId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwbSlot {
    pub page_id: PageId,
    pub image: Vec<u8>,
}

fn encode_slots(slots: &[DwbSlot]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_u64(&mut buf, slots.len() as u64);
    for slot in slots {
        write_u64(&mut buf, slot.page_id.0);
        write_bytes(&mut buf, &slot.image);
    }
    buf
}

fn decode_slots(bytes: &[u8]) -> Option<Vec<DwbSlot>> {
    let mut cur = Cursor::new(bytes);
    let count = cur.read_u64()?;
    let mut slots = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let page_id = PageId(cur.read_u64()?);
        let image = read_bytes_field(&mut cur)?;
        slots.push(DwbSlot { page_id, image });
    }
    Some(slots)
}

/// Stages `slots` durably, then overwrites each page's real file, then
/// clears the staging area. Used both for a full checkpoint flush and for a
/// lone dirty page evicted from the buffer pool (spec.md §4.4 routes victim
/// flushes through this same path rather than writing the page directly).
pub fn flush_via_dwb(disk: &FsDiskStore, slots: &[DwbSlot]) -> EngineResult<()> {
    if slots.is_empty() {
        return Ok(());
    }

    disk.write_dwb(&encode_slots(slots))?;
    disk.flush()?;

    for slot in slots {
        disk.write_page(slot.page_id, &slot.image)?;
    }
    disk.flush()?;

    clear(disk)
}

fn clear(disk: &FsDiskStore) -> EngineResult<()> {
    disk.write_dwb(&encode_slots(&[]))?;
    disk.flush()
}

/// Recovery step: if the DWB holds a staged batch, the process died between
/// staging and clearing. Replay every slot onto its page file (overwriting a
/// torn write with the known-good staged image is always safe, staged or
/// not) and clear the buffer. Runs before the redo phase (spec.md §4.8).
pub fn repair_on_recovery(disk: &FsDiskStore) -> EngineResult<()> {
    let Some(bytes) = disk.read_dwb()? else {
        return Ok(());
    };
    let slots = decode_slots(&bytes)
        .ok_or_else(|| crate::error::EngineError::CorruptLog("dwb blob did not decode".into()))?;

    if slots.is_empty() {
        return Ok(());
    }

    warn!("dwb recovery: repairing {} page(s) from a staged batch", slots.len());
    for slot in &slots {
        disk.write_page(slot.page_id, &slot.image)?;
    }
    disk.flush()?;
    clear(disk)?;
    info!("dwb recovery: repair complete");
    Ok(())
}
