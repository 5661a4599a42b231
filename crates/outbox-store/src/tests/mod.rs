//! Integration tests for the outbox store.
//!
//! Every test runs against a fresh database file in a temp directory, since
//! the pool needs a file that all of its connections can share.
//!
//! - `leasing.rs`      - claiming, lease release, stale-lock sweeps
//! - `concurrency.rs`  - many dispatchers on one outbox
//! - `transactions.rs` - inserts joining the caller's transaction
//! - `updates.rs`      - post-attempt updates
//! - `retention.rs`    - purging old records
//! - `failures.rs`     - codec failures and rejected input
//! - `lifecycle.rs`    - opening, reopening and full dispatch cycles


use crate::{OutboxStore, PoolConfig, Record, RecordState, StoreSettings};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

/// Message type used across the suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OrderPlaced {
    pub order_id: String,
    pub total_cents: i64,
}

impl OrderPlaced {
    pub fn new(n: usize) -> Self {
        Self {
            order_id: format!("order-{}", n),
            total_cents: 100 * n as i64,
        }
    }
}

/// A store over a fresh database file. Keep the `TempDir` alive for the
/// duration of the test.
pub(crate) fn open_store() -> (TempDir, OutboxStore<OrderPlaced>) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store_at(&dir);
    (dir, store)
}

pub(crate) fn open_store_at(dir: &TempDir) -> OutboxStore<OrderPlaced> {
    let settings = StoreSettings::for_path(dir.path().join("outbox.db"));
    OutboxStore::open(&settings, PoolConfig::default()).unwrap()
}

/// Fixed clock: `secs` seconds after a base instant.
pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// Insert a record in its own committed transaction.
pub(crate) fn insert_committed<M, C>(store: &OutboxStore<M, C>, record: &Record<M>)
where
    C: crate::MessageCodec<M>,
{
    let mut conn = store.connection().unwrap();
    let tx = conn.transaction().unwrap();
    store.add_record(&tx, record).unwrap();
    tx.commit().unwrap();
}

/// Create and commit a pending record created at `created`.
pub(crate) fn insert_order(
    store: &OutboxStore<OrderPlaced>,
    n: usize,
    created: i64,
) -> Record<OrderPlaced> {
    let record = Record::new_at(OrderPlaced::new(n), at(created));
    insert_committed(store, &record);
    record
}

/// One full dispatch cycle with a broker that always succeeds.
#[test]
fn basic_dispatch_cycle() {
    let (_dir, store) = open_store();
    let first = insert_order(&store, 1, 0);
    let second = insert_order(&store, 2, 1);

    let lock_id = crate::LockId::new("dispatcher-1");
    assert_eq!(store.claim_pending_records(&lock_id, at(10)).unwrap(), 2);

    let batch = store.get_records_by_lock_id(&lock_id).unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].message, first.message);
    assert_eq!(batch[1].message, second.message);

    for mut record in batch {
        record.mark_processed(at(11));
        assert!(store.update_record_by_id(&record).unwrap());
    }
    assert_eq!(store.clear_locks_by_lock_id(&lock_id).unwrap(), 0);

    let done = store.get_record(&first.id).unwrap().unwrap();
    assert_eq!(done.state, RecordState::Processed);
    assert_eq!(done.processed_on, Some(at(11)));
    assert!(!done.is_locked());

    let summary = store.count_records_by_state().unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.locked, 0);
}
