// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

use super::DatabaseManager;
use crate::command::InsertRecords;
use crate::record::StorageRecord;
use crate::Error;
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

fn record(ts: i64, priority: i64) -> StorageRecord {
  StorageRecord {
    sensor: "temperature".to_string(),
    timestamp_ms: ts,
    priority,
    synced: true,
    payload_tag: "scalar".to_string(),
    payload: "{\"value\":21.5}".to_string(),
    location: None,
  }
}

#[test]
fn construction_validates_arguments() {
  assert_matches!(DatabaseManager::new("", 0), Err(Error::InvalidArgument(_)));
  assert_matches!(
    DatabaseManager::new("samples.db", -5),
    Err(Error::InvalidArgument(_))
  );
}

#[test]
fn delegates_to_commands() {
  let dir = TempDir::new().unwrap();
  let manager = DatabaseManager::new(dir.path().join("samples.db"), 0).unwrap();

  assert_eq!(manager.record_count().unwrap(), 0);

  manager
    .execute(&InsertRecords::new(
      (0 .. 20).map(|ts| record(ts, ts % 5)).collect(),
    ))
    .unwrap();
  assert_eq!(manager.record_count().unwrap(), 20);

  assert_eq!(manager.delete_oldest(6, true).unwrap(), 6);
  assert_eq!(manager.record_count().unwrap(), 14);

  // Deleting more than stored reports the actual count.
  assert_eq!(manager.delete_oldest(100, false).unwrap(), 14);

  let applied = manager.set_maximum_size(1 << 21).unwrap();
  assert!(applied >= 1 << 21);
  assert_eq!(manager.maximum_size().unwrap(), applied);
}

#[test]
fn serializes_concurrent_access() {
  let dir = TempDir::new().unwrap();
  let manager = Arc::new(DatabaseManager::new(dir.path().join("samples.db"), 0).unwrap());

  let threads: Vec<_> = (0 .. 4)
    .map(|t| {
      let manager = manager.clone();
      std::thread::spawn(move || {
        for i in 0 .. 25 {
          manager
            .execute(&InsertRecords::new(vec![record(t * 100 + i, 2)]))
            .unwrap();
        }
      })
    })
    .collect();
  for thread in threads {
    thread.join().unwrap();
  }

  assert_eq!(manager.record_count().unwrap(), 100);
}
