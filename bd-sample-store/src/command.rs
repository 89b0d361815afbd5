// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./command_test.rs"]
mod tests;

use crate::database::Database;
use crate::record::StorageRecord;
use crate::{Error, Result};

/// Baseline number of attempts a command makes to open the engine before giving up.
pub const DEFAULT_RETRY_COUNT: usize = 5;

/// Runs `f` up to `attempts` times, retrying only transient engine failures. `StoreFull` is
/// never retried here; recovery for it belongs to the overflow strategy chain. Retries are
/// immediate, this is a bounded reopen loop and not a backoff policy.
pub fn with_retry<T>(attempts: usize, mut f: impl FnMut() -> Result<T>) -> Result<T> {
  let attempts = attempts.max(1);
  for attempt in 1 .. attempts {
    match f() {
      Err(Error::Engine(e)) => {
        log::debug!("transient engine failure (attempt {attempt}/{attempts}): {e}");
      },
      other => return other,
    }
  }
  f()
}

//
// StoreCommand
//

// A discrete, retryable unit of work against the storage engine. Each execution opens the
// engine in the command's mode, applies the verb and closes the handle again on the way out,
// success or failure, so no command holds the engine across unrelated work.
pub trait StoreCommand {
  type Output;

  /// Size queries open read-only; mutating commands open read-write.
  fn open_read_only(&self) -> bool {
    false
  }

  fn retry_limit(&self) -> usize {
    DEFAULT_RETRY_COUNT
  }

  fn apply(&self, db: &mut Database) -> Result<Self::Output>;

  fn execute(&self, db: &mut Database) -> Result<Self::Output> {
    let opened = with_retry(self.retry_limit(), || {
      if self.open_read_only() {
        db.open_read_only()
      } else {
        db.open()
      }
    });
    let result = opened.and_then(|()| self.apply(db));
    db.close();
    result
  }
}

//
// InsertRecords
//

pub struct InsertRecords {
  records: Vec<StorageRecord>,
}

impl InsertRecords {
  #[must_use]
  pub const fn new(records: Vec<StorageRecord>) -> Self {
    Self { records }
  }

  #[must_use]
  pub fn record_count(&self) -> usize {
    self.records.len()
  }

  #[must_use]
  pub fn records(&self) -> &[StorageRecord] {
    &self.records
  }

  #[must_use]
  pub fn into_records(self) -> Vec<StorageRecord> {
    self.records
  }
}

impl StoreCommand for InsertRecords {
  type Output = ();

  fn apply(&self, db: &mut Database) -> Result<()> {
    db.insert_records(&self.records)
  }
}

//
// DeleteOrdered
//

// Bulk deletion used by overflow recovery; write sensitive, so it gets twice the baseline
// retry budget.
pub struct DeleteOrdered {
  count: i64,
  lowest_priority_first: bool,
}

impl DeleteOrdered {
  #[must_use]
  pub const fn new(count: i64, lowest_priority_first: bool) -> Self {
    Self {
      count,
      lowest_priority_first,
    }
  }

  #[must_use]
  pub const fn count(&self) -> i64 {
    self.count
  }

  #[must_use]
  pub const fn lowest_priority_first(&self) -> bool {
    self.lowest_priority_first
  }
}

impl StoreCommand for DeleteOrdered {
  type Output = i64;

  fn retry_limit(&self) -> usize {
    DEFAULT_RETRY_COUNT * 2
  }

  fn apply(&self, db: &mut Database) -> Result<i64> {
    db.delete_ordered(self.count, self.lowest_priority_first)
  }
}

//
// GetMaximumSize
//

pub struct GetMaximumSize;

impl StoreCommand for GetMaximumSize {
  type Output = i64;

  fn open_read_only(&self) -> bool {
    true
  }

  fn apply(&self, db: &mut Database) -> Result<i64> {
    db.maximum_size()
  }
}

//
// SetMaximumSize
//

// The size cap is connection state under the hood, so applying it does not need a writable
// handle.
pub struct SetMaximumSize {
  bytes: i64,
}

impl SetMaximumSize {
  #[must_use]
  pub const fn new(bytes: i64) -> Self {
    Self { bytes }
  }
}

impl StoreCommand for SetMaximumSize {
  type Output = i64;

  fn open_read_only(&self) -> bool {
    true
  }

  fn apply(&self, db: &mut Database) -> Result<i64> {
    db.set_maximum_size(self.bytes)
  }
}

//
// GetRecordCount
//

pub struct GetRecordCount;

impl StoreCommand for GetRecordCount {
  type Output = i64;

  fn open_read_only(&self) -> bool {
    true
  }

  fn apply(&self, db: &mut Database) -> Result<i64> {
    db.record_count()
  }
}
