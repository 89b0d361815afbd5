// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#![deny(
  clippy::expect_used,
  clippy::panic,
  clippy::todo,
  clippy::unimplemented,
  clippy::unreachable,
  clippy::unwrap_used
)]

pub mod command;
pub mod config;
pub mod database;
pub mod manager;
pub mod record;
pub mod strategy;
pub mod worker;

pub use command::{
  DEFAULT_RETRY_COUNT,
  DeleteOrdered,
  GetMaximumSize,
  GetRecordCount,
  InsertRecords,
  SetMaximumSize,
  StoreCommand,
  with_retry,
};
pub use config::{MIN_DATABASE_SIZE_BYTES, StoreConfig};
pub use database::{Database, RemovalOrder};
pub use manager::DatabaseManager;
pub use record::StorageRecord;
pub use strategy::{
  DeleteSamplesStrategy,
  NotificationStrategy,
  OverflowChain,
  OverflowPolicy,
  OverflowStrategy,
  StopServiceStrategy,
  StoreProbe,
  WaitStrategy,
  build_chain,
};
pub use worker::{PersistentStorageManager, SampleObserver};

/// Notification token used when raising the storage exhausted notification, so the very same
/// notification can be cancelled later.
pub const STORAGE_FULL_NOTIFICATION: u32 = 0x5d01;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  /// Operation attempted on a closed database handle. A lifecycle bug, never retried.
  #[error("operation attempted on a closed database handle")]
  NotOpen,
  /// Committing the batch would exceed the configured maximum database size. Recovered through
  /// the overflow strategy chain, never silently swallowed.
  #[error("insert would exceed the configured maximum database size")]
  StoreFull,
  #[error("invalid argument: {0}")]
  InvalidArgument(String),
  #[error("record decode failed: {0}")]
  Decode(String),
  /// Underlying storage engine failure, possibly transient (e.g. lock contention).
  #[error("storage engine failure: {0}")]
  Engine(rusqlite::Error),
  #[error("failed to start worker thread: {0}")]
  ThreadStart(String),
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    match &e {
      rusqlite::Error::SqliteFailure(inner, _)
        if inner.code == rusqlite::ErrorCode::DiskFull =>
      {
        Self::StoreFull
      },
      _ => Self::Engine(e),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;

//
// NotificationSink
//

/// External capability to surface a user visible notification. The store raises the storage
/// exhausted notification with `STORAGE_FULL_NOTIFICATION` and may cancel it with the same
/// token once the condition clears.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
  fn notify(&self, token: u32, message: &str);
  fn cancel(&self, token: u32);
}

//
// ServiceControl
//

/// External capability to stop the hosting service. Returns false when the service could not be
/// stopped.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceControl: Send + Sync {
  fn stop_service(&self) -> bool;
}
