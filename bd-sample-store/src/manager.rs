// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./manager_test.rs"]
mod tests;

use crate::command::{DeleteOrdered, GetMaximumSize, GetRecordCount, SetMaximumSize, StoreCommand};
use crate::database::Database;
use crate::Result;
use parking_lot::Mutex;
use std::path::Path;

//
// DatabaseManager
//

// Owns the engine handle and runs commands against it. Accessors may be called from any thread;
// the per instance mutex keeps the handle exclusively operated by one thread at a time, held
// only for the duration of a single command.
#[derive(Debug)]
pub struct DatabaseManager {
  db: Mutex<Database>,
}

impl DatabaseManager {
  /// Fails eagerly with `Error::InvalidArgument` for an unusable database path rather than
  /// deferring to first use.
  pub fn new(path: impl AsRef<Path>, max_size_bytes: i64) -> Result<Self> {
    Ok(Self {
      db: Mutex::new(Database::new(path, max_size_bytes)?),
    })
  }

  /// Generic execution entry point; command failures propagate unchanged.
  pub fn execute<C: StoreCommand>(&self, command: &C) -> Result<C::Output> {
    command.execute(&mut self.db.lock())
  }

  pub fn record_count(&self) -> Result<i64> {
    self.execute(&GetRecordCount)
  }

  pub fn maximum_size(&self) -> Result<i64> {
    self.execute(&GetMaximumSize)
  }

  /// Returns the size actually applied, which the engine rounds to page granularity.
  pub fn set_maximum_size(&self, bytes: i64) -> Result<i64> {
    self.execute(&SetMaximumSize::new(bytes))
  }

  /// Deletion primitive used by overflow recovery. Returns the number of records actually
  /// deleted, which may be less than requested when the store holds fewer.
  pub fn delete_oldest(&self, count: i64, lowest_priority_first: bool) -> Result<i64> {
    self.execute(&DeleteOrdered::new(count, lowest_priority_first))
  }
}
