// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::{Database, RemovalOrder};
use crate::record::StorageRecord;
use crate::Error;
use assert_matches::assert_matches;
use parameterized::parameterized;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn open_db(dir: &TempDir) -> Database {
  let mut db = Database::new(dir.path().join("samples.db"), 0).unwrap();
  db.open().unwrap();
  db
}

fn record(ts: i64, priority: i64) -> StorageRecord {
  StorageRecord {
    sensor: "light".to_string(),
    timestamp_ms: ts,
    priority,
    synced: false,
    payload_tag: "scalar".to_string(),
    payload: "{\"value\":1.0}".to_string(),
    location: None,
  }
}

fn filler_record(ts: i64, payload_bytes: usize) -> StorageRecord {
  let mut record = record(ts, 2);
  record.payload = "x".repeat(payload_bytes);
  record
}

#[test]
fn rejects_invalid_construction() {
  assert_matches!(Database::new("", 0), Err(Error::InvalidArgument(_)));
  assert_matches!(Database::new("samples.db", -1), Err(Error::InvalidArgument(_)));
}

#[test]
fn operations_require_open_handle() {
  let dir = TempDir::new().unwrap();
  let mut db = Database::new(dir.path().join("samples.db"), 0).unwrap();

  assert_matches!(db.record_count(), Err(Error::NotOpen));
  assert_matches!(db.insert_records(&[record(1, 0)]), Err(Error::NotOpen));
  assert_matches!(db.remove_ordered(1, RemovalOrder::OldestFirst), Err(Error::NotOpen));
  assert_matches!(db.set_maximum_size(1 << 20), Err(Error::NotOpen));

  // close is idempotent, open is too.
  db.close();
  db.close();
  db.open().unwrap();
  db.open().unwrap();
  assert_eq!(db.record_count().unwrap(), 0);
}

#[test]
fn insert_and_count_survive_reopen() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);

  db.insert_records(&(0 .. 25).map(|ts| record(ts, 1)).collect::<Vec<_>>())
    .unwrap();
  assert_eq!(db.record_count().unwrap(), 25);

  db.close();
  db.open().unwrap();
  assert_eq!(db.record_count().unwrap(), 25);
}

#[test]
fn maximum_size_rounds_to_whole_pages() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  let page_size = db.page_size().unwrap();

  let requested = page_size * 3 + 1;
  let applied = db.set_maximum_size(requested).unwrap();
  assert_eq!(applied % page_size, 0);
  assert!(applied >= requested);
  assert_eq!(db.maximum_size().unwrap(), applied);

  assert_matches!(db.set_maximum_size(0), Err(Error::InvalidArgument(_)));
}

#[test]
fn shrinking_below_usage_does_not_evict() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);

  db.insert_records(&(0 .. 100).map(|ts| filler_record(ts, 1024)).collect::<Vec<_>>())
    .unwrap();
  let count_before = db.record_count().unwrap();

  let page_size = db.page_size().unwrap();
  let applied = db.set_maximum_size(page_size).unwrap();
  // The engine clamps at current usage instead of evicting.
  assert!(applied > page_size);
  assert_eq!(db.record_count().unwrap(), count_before);
}

// Spec scenario: a 10 page cap, inserting batches of 10 until the store refuses. The failing
// batch must not be partially committed.
#[test]
fn full_store_rejects_batch_atomically() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  let page_size = db.page_size().unwrap();
  db.set_maximum_size(10 * page_size).unwrap();

  let mut committed: i64 = 0;
  let mut ts = 0;
  let failure = loop {
    let batch: Vec<_> = (0 .. 10)
      .map(|i| filler_record(ts + i, 1024))
      .collect();
    ts += 10;
    match db.insert_records(&batch) {
      Ok(()) => committed += 10,
      Err(e) => break e,
    }
    assert!(committed < 10_000, "store never filled up");
  };

  assert_matches!(failure, Error::StoreFull);
  assert_eq!(db.record_count().unwrap(), committed);

  // Raising the cap makes the same batch insertable again.
  db.set_maximum_size(100 * page_size).unwrap();
  db.insert_records(&[filler_record(ts, 1024)]).unwrap();
  assert_eq!(db.record_count().unwrap(), committed + 1);
}

#[test]
fn oldest_first_removal_is_monotone() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);

  // Insert with shuffled timestamps.
  let mut rng = StdRng::seed_from_u64(7);
  let mut timestamps: Vec<i64> = (0 .. 50).collect();
  for i in (1 .. timestamps.len()).rev() {
    timestamps.swap(i, rng.random_range(0 ..= i));
  }
  db.insert_records(&timestamps.iter().map(|&ts| record(ts, 2)).collect::<Vec<_>>())
    .unwrap();

  let first = db.remove_ordered(10, RemovalOrder::OldestFirst).unwrap();
  assert_eq!(
    first.iter().map(|r| r.timestamp_ms).collect::<Vec<_>>(),
    (0 .. 10).collect::<Vec<_>>()
  );

  // Repeated calls keep yielding non-decreasing timestamps.
  let mut last_ts = first.last().unwrap().timestamp_ms;
  loop {
    let removed = db.remove_ordered(7, RemovalOrder::OldestFirst).unwrap();
    if removed.is_empty() {
      break;
    }
    for r in &removed {
      assert!(r.timestamp_ms >= last_ts);
      last_ts = r.timestamp_ms;
    }
  }
  assert_eq!(db.record_count().unwrap(), 0);
}

fn randomized_records(count: i64) -> Vec<StorageRecord> {
  let mut rng = StdRng::seed_from_u64(0x5eed);
  (0 .. count)
    .map(|ts| record(ts, rng.random_range(0 .. 5)))
    .collect()
}

#[test]
fn lowest_priority_first_removes_least_important_oldest_first() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  db.insert_records(&randomized_records(120)).unwrap();

  // Least important (highest ordinal) first, ascending timestamp inside a priority class.
  let mut last_key = (i64::MIN, i64::MIN);
  loop {
    let removed = db
      .remove_ordered(9, RemovalOrder::LowestPriorityFirst)
      .unwrap();
    if removed.is_empty() {
      break;
    }
    for r in &removed {
      let key = (-r.priority, r.timestamp_ms);
      assert!(key >= last_key, "order violated at {key:?} after {last_key:?}");
      last_key = key;
    }
  }
}

#[test]
fn highest_priority_first_removes_most_important_oldest_first() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  db.insert_records(&randomized_records(120)).unwrap();

  let mut last_key = (i64::MIN, i64::MIN);
  loop {
    let removed = db
      .remove_ordered(9, RemovalOrder::HighestPriorityFirst)
      .unwrap();
    if removed.is_empty() {
      break;
    }
    for r in &removed {
      let key = (r.priority, r.timestamp_ms);
      assert!(key >= last_key, "order violated at {key:?} after {last_key:?}");
      last_key = key;
    }
  }
}

// Removing until empty yields exactly the original record set, no duplicates, no omissions.
// 450 records also crosses the 200 placeholder chunking boundary.
#[parameterized(order = {
  RemovalOrder::OldestFirst, RemovalOrder::LowestPriorityFirst, RemovalOrder::HighestPriorityFirst
})]
fn exhaustive_removal_preserves_record_set(order: RemovalOrder) {
  use pretty_assertions::assert_eq;

  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);

  let records = randomized_records(450);
  let expected: BTreeSet<i64> = records.iter().map(|r| r.timestamp_ms).collect();
  db.insert_records(&records).unwrap();

  let removed = db.remove_ordered(450, order).unwrap();
  assert_eq!(removed.len(), 450);
  let seen: BTreeSet<i64> = removed.iter().map(|r| r.timestamp_ms).collect();
  assert_eq!(seen, expected);
  assert_eq!(db.record_count().unwrap(), 0);
}

#[test]
fn remove_returns_fewer_when_store_is_smaller() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  db.insert_records(&(0 .. 5).map(|ts| record(ts, 0)).collect::<Vec<_>>())
    .unwrap();

  let removed = db.remove_ordered(10, RemovalOrder::OldestFirst).unwrap();
  assert_eq!(removed.len(), 5);
  assert!(db.remove_ordered(10, RemovalOrder::OldestFirst).unwrap().is_empty());
}

#[test]
fn delete_ordered_reclaims_lowest_priority_victims() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);

  // Two priority classes; the less important one goes first.
  let mut records: Vec<_> = (0 .. 10).map(|ts| record(ts, 0)).collect();
  records.extend((10 .. 20).map(|ts| record(ts, 4)));
  db.insert_records(&records).unwrap();

  assert_eq!(db.delete_ordered(10, true).unwrap(), 10);
  let survivors = db.remove_ordered(20, RemovalOrder::OldestFirst).unwrap();
  assert!(survivors.iter().all(|r| r.priority == 0));
}

#[test]
fn delete_ordered_oldest_first_and_chunking() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  db.insert_records(&(0 .. 450).map(|ts| record(ts, 2)).collect::<Vec<_>>())
    .unwrap();

  assert_eq!(db.delete_ordered(300, false).unwrap(), 300);
  let survivors = db.remove_ordered(450, RemovalOrder::OldestFirst).unwrap();
  assert_eq!(survivors.first().unwrap().timestamp_ms, 300);
  assert_eq!(survivors.len(), 150);
}

#[test]
fn delete_all_empties_the_store() {
  let dir = TempDir::new().unwrap();
  let mut db = open_db(&dir);
  db.insert_records(&(0 .. 30).map(|ts| record(ts, 1)).collect::<Vec<_>>())
    .unwrap();

  assert!(db.delete_all().unwrap());
  assert_eq!(db.record_count().unwrap(), 0);
}

#[test]
fn read_only_open_falls_back_for_missing_file() {
  let dir = TempDir::new().unwrap();
  let mut db = Database::new(dir.path().join("fresh.db"), 0).unwrap();
  db.open_read_only().unwrap();
  assert_eq!(db.record_count().unwrap(), 0);
}
