// shared-core - bitdrift's common client/server libraries
// Copyright Bitdrift, Inc. All rights reserved.
//
// Use of this source code is governed by a source available license that can be found in the
// LICENSE file or at:
// https://polyformproject.org/wp-content/uploads/2020/06/PolyForm-Shield-1.0.0.txt

#[cfg(test)]
#[path = "./worker_test.rs"]
mod tests;

use crate::command::{InsertRecords, StoreCommand};
use crate::config::StoreConfig;
use crate::manager::DatabaseManager;
use crate::record::StorageRecord;
use crate::strategy::{OverflowChain, StoreProbe, build_chain};
use crate::{Error, NotificationSink, Result, ServiceControl};
use bd_sample::Sample;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

// Upper bound on how long the worker sleeps between wakeups while idle. The condvar is
// signalled on enqueue and on every lifecycle transition, so this only bounds missed
// signal recovery.
const IDLE_WAIT: Duration = Duration::from_secs(1);

//
// SharedData
//

struct SharedData {
  manager: DatabaseManager,
  chain: OverflowChain,
  queue: Mutex<VecDeque<Sample>>,
  signal: Condvar,
  // Batch that hit the size limit, kept aside so overflow recovery can re-execute it as-is.
  pending: Mutex<Option<InsertRecords>>,
  working: AtomicBool,
  // Set when the overflow chain was exhausted; distinguishes an overflow stall from an
  // explicit pause() so a size increase can restart consumption.
  stalled: AtomicBool,
  terminated: AtomicBool,
  saved_record_count: AtomicU64,
}

impl SharedData {
  fn worker_thread_func(&self) {
    log::debug!("starting storage worker thread func");
    while !self.terminated.load(Ordering::Relaxed) {
      let batch = {
        let mut queue = self.queue.lock();
        let idle = queue.is_empty() && self.pending.lock().is_none();
        if idle || !self.working.load(Ordering::Relaxed) {
          self.signal.wait_for(&mut queue, IDLE_WAIT);
          continue;
        }
        std::mem::take(&mut *queue)
      };

      self.persist_batch(batch);
    }
    log::debug!("stopping storage worker thread func");
  }

  fn persist_batch(&self, batch: VecDeque<Sample>) {
    // A batch left pending by a previous overflow stall rides along with the new one so it
    // still commits in arrival order.
    let mut records = self
      .pending
      .lock()
      .take()
      .map_or_else(Vec::new, InsertRecords::into_records);
    records.extend(batch.iter().filter_map(|sample| {
      match StorageRecord::from_sample(sample) {
        Ok(record) => Some(record),
        Err(e) => {
          log::warn!("dropping unencodable sample from {}: {e}", sample.sensor);
          None
        },
      }
    }));
    if records.is_empty() {
      return;
    }

    *self.pending.lock() = Some(InsertRecords::new(records));
    match self.execute_pending() {
      Ok(true) => {},
      Ok(false) => {
        log::warn!("insert exceeded the maximum database size, running overflow recovery");
        if !self.chain.run(self) {
          log::error!("overflow recovery exhausted, suspending sample consumption");
          self.stalled.store(true, Ordering::Relaxed);
          self.working.store(false, Ordering::Relaxed);
        }
      },
      Err(e) => {
        // Non-recoverable engine failure. The batch was already retried by the command
        // layer, so it is dropped rather than wedging the worker.
        let dropped = self.pending.lock().take().map_or(0, |i| i.record_count());
        log::error!("failed to persist batch of {dropped} records: {e}");
      },
    }
  }

  /// Executes the pending insert, if any. `Ok(true)` means nothing is pending anymore (the
  /// insert committed, or there was none); `Ok(false)` means the store is full and the batch
  /// is still pending. Other engine failures propagate with the batch left in place.
  fn execute_pending(&self) -> Result<bool> {
    let Some(insert) = self.pending.lock().take() else {
      return Ok(true);
    };
    let count = insert.record_count() as u64;
    match self.manager.execute(&insert) {
      Ok(()) => {
        self.saved_record_count.fetch_add(count, Ordering::Relaxed);
        Ok(true)
      },
      Err(Error::StoreFull) => {
        *self.pending.lock() = Some(insert);
        Ok(false)
      },
      Err(e) => {
        *self.pending.lock() = Some(insert);
        Err(e)
      },
    }
  }
}

impl StoreProbe for SharedData {
  fn retry_pending_insert(&self) -> bool {
    match self.execute_pending() {
      Ok(committed) => committed,
      Err(e) => {
        let dropped = self.pending.lock().take().map_or(0, |i| i.record_count());
        log::error!("retry failed, dropping batch of {dropped} records: {e}");
        true
      },
    }
  }

  fn record_count(&self) -> i64 {
    match self.manager.record_count() {
      Ok(count) => count,
      Err(e) => {
        log::warn!("record count unavailable during overflow recovery: {e}");
        0
      },
    }
  }

  fn delete_oldest(&self, count: i64, lowest_priority_first: bool) -> i64 {
    match self.manager.delete_oldest(count, lowest_priority_first) {
      Ok(deleted) => deleted,
      Err(e) => {
        log::warn!("deletion failed during overflow recovery: {e}");
        0
      },
    }
  }
}

//
// SampleObserver
//

/// Cloneable producer handle. Enqueueing is O(1) and never blocks on the storage engine;
/// samples observed after termination are dropped.
#[derive(Clone)]
pub struct SampleObserver {
  shared: Arc<SharedData>,
}

impl SampleObserver {
  pub fn enqueue(&self, sample: Sample) {
    if self.shared.terminated.load(Ordering::Relaxed) {
      log::warn!("sample from {} observed after termination, dropped", sample.sensor);
      return;
    }
    self.shared.queue.lock().push_back(sample);
    self.shared.signal.notify_one();
  }
}

//
// PersistentStorageManager
//

/// Owns the in-memory sample queue, the worker thread draining it into the database, and the
/// overflow recovery chain. Constructed idle; call `start()` to begin consuming.
pub struct PersistentStorageManager {
  shared: Arc<SharedData>,
  worker_thread: Option<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for PersistentStorageManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PersistentStorageManager")
      .finish_non_exhaustive()
  }
}

impl PersistentStorageManager {
  pub fn new(
    config: &StoreConfig,
    sink: Arc<dyn NotificationSink>,
    control: Arc<dyn ServiceControl>,
  ) -> Result<Self> {
    let manager = DatabaseManager::new(
      &config.database_path,
      config.maximum_database_size_bytes,
    )?;
    let chain = build_chain(config, sink, control);

    let shared = Arc::new(SharedData {
      manager,
      chain,
      queue: Mutex::new(VecDeque::new()),
      signal: Condvar::new(),
      pending: Mutex::new(None),
      working: AtomicBool::new(false),
      stalled: AtomicBool::new(false),
      terminated: AtomicBool::new(false),
      saved_record_count: AtomicU64::new(0),
    });

    let cloned_shared = shared.clone();
    let worker_thread = std::thread::Builder::new()
      .name("bd-sample-store".to_string())
      .spawn(move || cloned_shared.worker_thread_func())
      .map_err(|e| Error::ThreadStart(e.to_string()))?;

    Ok(Self {
      shared,
      worker_thread: Some(worker_thread),
    })
  }

  #[must_use]
  pub fn observer(&self) -> SampleObserver {
    SampleObserver {
      shared: self.shared.clone(),
    }
  }

  /// Begins consuming queued samples. Idempotent.
  pub fn start(&self) {
    self.shared.working.store(true, Ordering::Relaxed);
    self.shared.signal.notify_one();
  }

  /// Suspends consumption. Queued samples are retained and drained on `resume()`.
  pub fn pause(&self) {
    self.shared.working.store(false, Ordering::Relaxed);
  }

  /// Resumes consumption after a pause or an overflow stall, resetting the saved record
  /// counter for the new session.
  pub fn resume(&self) {
    self.shared.saved_record_count.store(0, Ordering::Relaxed);
    match self.shared.manager.record_count() {
      Ok(count) => log::info!("resuming sample consumption, {count} records stored"),
      Err(e) => log::warn!("resuming sample consumption, record count unavailable: {e}"),
    }
    self.shared.stalled.store(false, Ordering::Relaxed);
    self.shared.working.store(true, Ordering::Relaxed);
    self.shared.signal.notify_one();
  }

  /// Cooperative stop: the in-flight batch completes, then the worker idles.
  pub fn stop(&self) {
    self.shared.working.store(false, Ordering::Relaxed);
    self.shared.signal.notify_one();
  }

  /// Terminates the worker thread and drops any queued samples. Safe to call from any state,
  /// more than once. Called on drop.
  pub fn terminate(&mut self) {
    if self.shared.terminated.swap(true, Ordering::Relaxed) {
      return;
    }
    self.shared.working.store(false, Ordering::Relaxed);
    self.shared.signal.notify_one();
    if let Some(worker_thread) = self.worker_thread.take() {
      let _ignored = worker_thread.join();
    }
    let dropped = std::mem::take(&mut *self.shared.queue.lock()).len();
    if dropped > 0 {
      log::info!("terminated with {dropped} unsaved queued samples");
    }
  }

  #[must_use]
  pub fn is_working(&self) -> bool {
    self.shared.working.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn has_terminated(&self) -> bool {
    self.shared.terminated.load(Ordering::Relaxed)
  }

  /// Records persisted since the last `resume()` (or construction).
  #[must_use]
  pub fn saved_record_count(&self) -> u64 {
    self.shared.saved_record_count.load(Ordering::Relaxed)
  }

  pub fn record_count_in_database(&self) -> Result<i64> {
    self.shared.manager.record_count()
  }

  pub fn maximum_database_size(&self) -> Result<i64> {
    self.shared.manager.maximum_size()
  }

  /// Applies a new size cap. When the worker stalled on overflow recovery, a raised cap
  /// restarts consumption.
  pub fn set_maximum_database_size(&self, bytes: i64) -> Result<i64> {
    let applied = self.shared.manager.set_maximum_size(bytes)?;
    if self.shared.stalled.swap(false, Ordering::Relaxed) {
      self.shared.working.store(true, Ordering::Relaxed);
      self.shared.signal.notify_one();
    }
    Ok(applied)
  }

  /// Runs an arbitrary command against the underlying engine.
  pub fn execute<C: StoreCommand>(&self, command: &C) -> Result<C::Output> {
    self.shared.manager.execute(command)
  }
}

impl Drop for PersistentStorageManager {
  fn drop(&mut self) {
    self.terminate();
  }
}
