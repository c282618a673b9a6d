//! End-to-end scenario 4 (spec.md §8): a crash mid-checkpoint — after the
//! double-write buffer has staged a batch, before the in-place page write
//! lands cleanly — is repaired by the DWB phase of recovery.
//!
//! The checkpoint protocol itself (spec.md §4.7) runs the DWB stage-then-
//! overwrite-then-clear sequence to completion in one call, so there's no
//! seam to interrupt it mid-flight through the public `Engine` API alone.
//! This test drives the same disk-level primitives `Engine::checkpoint`
//! uses internally to stage a batch and then simulates the crash window by
//! tearing the in-place page write after staging but before the engine ever
//! clears the DWB — exactly spec.md's "Crash mid-checkpoint" boundary case.

use small_db::disk_store::{inject_torn_write, FsDiskStore};
use small_db::dwb::{repair_on_recovery, DwbSlot};
use small_db::{Engine, EngineConfig, PageId, Row, RowId};

#[test]
fn torn_in_place_write_is_repaired_from_a_staged_dwb_batch() {
    let dir = tempfile::tempdir().unwrap();

    {
        let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
        let tx = engine.begin();
        engine
            .insert(tx, Row::new(RowId(1), b"A:20".to_vec()))
            .unwrap();
        engine.commit(tx).unwrap();
        engine.checkpoint().unwrap();
    }

    // Page 0 is the first page the engine ever allocates.
    let page_id = PageId(0);

    {
        let disk = FsDiskStore::open(dir.path()).unwrap();
        let good_bytes = disk.read_page(page_id).unwrap().unwrap();

        // Stage the known-good image, as a checkpoint would before
        // overwriting the in-place page, but never clear it — standing in
        // for a process death right after the in-place write tore.
        disk.write_dwb(&encode_dwb(&[DwbSlot {
            page_id,
            image: good_bytes,
        }]))
        .unwrap();
        disk.flush().unwrap();

        inject_torn_write(dir.path(), page_id).unwrap();
    }

    // Recovery must notice the staged batch and repair the page before the
    // redo phase even starts.
    let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
    let tx = engine.begin();
    let row = engine.read(tx, RowId(1)).unwrap();
    assert_eq!(row.payload, b"A:20");
}

#[test]
fn repair_on_recovery_is_reachable_directly_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let disk = FsDiskStore::open(dir.path()).unwrap();

    disk.write_page(PageId(7), b"good-image").unwrap();
    disk.write_dwb(&encode_dwb(&[DwbSlot {
        page_id: PageId(7),
        image: b"good-image".to_vec(),
    }]))
    .unwrap();
    inject_torn_write(dir.path(), PageId(7)).unwrap();

    repair_on_recovery(&disk).unwrap();
    assert_eq!(disk.read_page(PageId(7)).unwrap().unwrap(), b"good-image");

    // idempotent: the dwb is now empty, so running it again is a no-op.
    repair_on_recovery(&disk).unwrap();
    assert_eq!(disk.read_page(PageId(7)).unwrap().unwrap(), b"good-image");
}

/// Mirrors `dwb`'s private wire format just enough to stage a batch from a
/// test — `DwbSlot` itself is public but its encoder is not, since nothing
/// outside the crate should be producing these blobs in normal operation.
fn encode_dwb(slots: &[DwbSlot]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(slots.len() as u64).to_le_bytes());
    for slot in slots {
        buf.extend_from_slice(&slot.page_id.0.to_le_bytes());
        buf.extend_from_slice(&(slot.image.len() as u64).to_le_bytes());
        buf.extend_from_slice(&slot.image);
    }
    buf
}
