//! End-to-end scenario 2 (spec.md §8): a second transaction blocked on a
//! held row times out, then proceeds once the first transaction rolls back.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use small_db::{Engine, EngineConfig, EngineError, Row, RowId};

fn engine_with_timeout(dir: &std::path::Path, lock_timeout_ms: u64) -> Engine {
    let mut config = EngineConfig::new(dir);
    config.lock_timeout_ms = lock_timeout_ms;
    Engine::open(config).unwrap()
}

#[test]
fn contending_reader_times_out_then_succeeds_after_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_timeout(dir.path(), 100);

    let tx1 = engine.begin();
    engine
        .insert(tx1, Row::new(RowId(1), b"A:20".to_vec()))
        .unwrap();

    // tx2 contends on the same row tx1 still holds; it must time out since
    // tx1 never commits or rolls back within the window.
    let tx2 = engine.begin();
    let err = engine.read(tx2, RowId(1)).unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout(RowId(1))));

    engine.rollback(tx1).unwrap();

    // after the row is released, a fresh transaction sees no trace of it.
    let tx3 = engine.begin();
    let err = engine.read(tx3, RowId(1)).unwrap_err();
    assert!(matches!(err, EngineError::Missing(RowId(1))));
}

#[test]
fn second_transaction_proceeds_once_the_first_releases_the_row() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(engine_with_timeout(dir.path(), 5000));

    let tx1 = engine.begin();
    engine
        .insert(tx1, Row::new(RowId(1), b"A:20".to_vec()))
        .unwrap();

    let engine2 = Arc::clone(&engine);
    let handle = thread::spawn(move || {
        let tx2 = engine2.begin();
        let row = engine2.read(tx2, RowId(1)).unwrap();
        engine2.commit(tx2).unwrap();
        row
    });

    thread::sleep(Duration::from_millis(50));
    engine.commit(tx1).unwrap();

    let row = handle.join().unwrap();
    assert_eq!(row.payload, b"A:20");
}

#[test]
fn rollback_after_update_restores_prior_read_visible_state() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_timeout(dir.path(), 5000);

    let tx1 = engine.begin();
    engine
        .insert(tx1, Row::new(RowId(1), b"before".to_vec()))
        .unwrap();
    engine.commit(tx1).unwrap();

    let tx2 = engine.begin();
    engine.update(tx2, RowId(1), b"after".to_vec()).unwrap();
    engine.delete(tx2, RowId(1)).unwrap();
    engine.rollback(tx2).unwrap();

    let tx3 = engine.begin();
    let row = engine.read(tx3, RowId(1)).unwrap();
    assert_eq!(row.payload, b"before");
}
