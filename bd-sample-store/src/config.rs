// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./config_test.rs"]
mod tests;

use crate::strategy::OverflowPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Absolute floor for the configured maximum database size. Requests below it are clamped, not
/// rejected.
pub const MIN_DATABASE_SIZE_BYTES: i64 = 5 * 1024 * 1024;

pub const DEFAULT_DATABASE_SIZE_BYTES: i64 = 10 * 1024 * 1024;
pub const DEFAULT_DELETION_RECORD_COUNT: i64 = 1000;
pub const DEFAULT_OVERFLOW_WAIT: Duration = Duration::from_secs(10);

//
// StoreConfig
//

/// Configuration for the persistent sample store: where the database lives, how big it may
/// grow and how to recover when it is full.
#[derive(Clone, Debug)]
pub struct StoreConfig {
  pub database_path: PathBuf,
  pub maximum_database_size_bytes: i64,
  pub overflow_policy: OverflowPolicy,
  pub deletion_record_count: i64,
  pub delete_lowest_priority_first: bool,
  pub overflow_wait: Duration,
}

impl StoreConfig {
  pub fn new(database_path: impl Into<PathBuf>) -> Self {
    Self {
      database_path: database_path.into(),
      maximum_database_size_bytes: DEFAULT_DATABASE_SIZE_BYTES,
      overflow_policy: OverflowPolicy::WaitDeleteNotify,
      deletion_record_count: DEFAULT_DELETION_RECORD_COUNT,
      delete_lowest_priority_first: true,
      overflow_wait: DEFAULT_OVERFLOW_WAIT,
    }
  }

  /// The floor is applied here, not deferred to first use.
  #[must_use]
  pub fn with_maximum_database_size(mut self, bytes: i64) -> Self {
    self.maximum_database_size_bytes = bytes.max(MIN_DATABASE_SIZE_BYTES);
    self
  }

  #[must_use]
  pub const fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
    self.overflow_policy = policy;
    self
  }

  #[must_use]
  pub const fn with_deletion_record_count(mut self, count: i64) -> Self {
    self.deletion_record_count = count;
    self
  }

  #[must_use]
  pub const fn with_delete_lowest_priority_first(mut self, enabled: bool) -> Self {
    self.delete_lowest_priority_first = enabled;
    self
  }

  #[must_use]
  pub const fn with_overflow_wait(mut self, wait: Duration) -> Self {
    self.overflow_wait = wait;
    self
  }
}
